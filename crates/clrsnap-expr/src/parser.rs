//! Recursive-descent parser for the C# expression subset.

use smol_str::SmolStr;

use clrsnap_runtime::error::DebugError;
use clrsnap_object::signature::keyword_type;

use crate::ast::{BinaryOp, Expr, UnaryOp};
use crate::lexer::{tokenize, Token, TokenKind};

/// Trees deeper than this are rejected to bound evaluator recursion.
pub const MAX_AST_DEPTH: usize = 25;

/// Parse-time recursion guard, well above any accepted tree.
const MAX_PARSE_DEPTH: usize = 128;

/// Parse condition text into an expression tree.
pub fn parse_expression(source: &str) -> Result<Expr, DebugError> {
    parse_expression_bounded(source, MAX_AST_DEPTH)
}

/// Parse with an explicit depth bound, for configurable deployments.
pub fn parse_expression_bounded(source: &str, max_depth: usize) -> Result<Expr, DebugError> {
    let tokens = tokenize(source);
    if let Some(bad) = tokens.iter().find(|token| token.kind == TokenKind::Error) {
        return Err(DebugError::Type(
            format!("unrecognized token '{}'", bad.text).into(),
        ));
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let expr = parser.conditional()?;
    if parser.pos != parser.tokens.len() {
        return Err(DebugError::Type(
            format!("unexpected trailing input at '{}'", parser.current_text()).into(),
        ));
    }
    if expr.depth() > max_depth {
        return Err(DebugError::NotImplemented(
            "expression is nested too deeply".into(),
        ));
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn enter(&mut self) -> Result<(), DebugError> {
        self.depth += 1;
        if self.depth > MAX_PARSE_DEPTH {
            return Err(DebugError::NotImplemented(
                "expression is nested too deeply".into(),
            ));
        }
        Ok(())
    }

    fn peek(&self) -> Option<TokenKind> {
        self.tokens.get(self.pos).map(|token| token.kind)
    }

    fn current_text(&self) -> &str {
        self.tokens
            .get(self.pos)
            .map(|token| token.text.as_str())
            .unwrap_or("<end>")
    }

    fn bump(&mut self) -> Option<&Token> {
        let token = self.tokens.get(self.pos);
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, kind: TokenKind) -> bool {
        if self.peek() == Some(kind) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> Result<(), DebugError> {
        if self.eat(kind) {
            Ok(())
        } else {
            Err(DebugError::Type(
                format!("expected {what} before '{}'", self.current_text()).into(),
            ))
        }
    }

    fn conditional(&mut self) -> Result<Expr, DebugError> {
        self.enter()?;
        let result = self.conditional_inner();
        self.depth -= 1;
        result
    }

    fn conditional_inner(&mut self) -> Result<Expr, DebugError> {
        let condition = self.logical_or()?;
        if self.eat(TokenKind::Question) {
            let if_true = self.conditional()?;
            self.expect(TokenKind::Colon, "':'")?;
            let if_false = self.conditional()?;
            return Ok(Expr::Conditional {
                condition: Box::new(condition),
                if_true: Box::new(if_true),
                if_false: Box::new(if_false),
            });
        }
        Ok(condition)
    }

    fn logical_or(&mut self) -> Result<Expr, DebugError> {
        let mut left = self.logical_and()?;
        while self.eat(TokenKind::OrOr) {
            let right = self.logical_and()?;
            left = binary(BinaryOp::Or, left, right);
        }
        Ok(left)
    }

    fn logical_and(&mut self) -> Result<Expr, DebugError> {
        let mut left = self.bit_or()?;
        while self.eat(TokenKind::AndAnd) {
            let right = self.bit_or()?;
            left = binary(BinaryOp::And, left, right);
        }
        Ok(left)
    }

    fn bit_or(&mut self) -> Result<Expr, DebugError> {
        let mut left = self.bit_xor()?;
        while self.eat(TokenKind::Pipe) {
            let right = self.bit_xor()?;
            left = binary(BinaryOp::BitOr, left, right);
        }
        Ok(left)
    }

    fn bit_xor(&mut self) -> Result<Expr, DebugError> {
        let mut left = self.bit_and()?;
        while self.eat(TokenKind::Caret) {
            let right = self.bit_and()?;
            left = binary(BinaryOp::BitXor, left, right);
        }
        Ok(left)
    }

    fn bit_and(&mut self) -> Result<Expr, DebugError> {
        let mut left = self.equality()?;
        while self.eat(TokenKind::Amp) {
            let right = self.equality()?;
            left = binary(BinaryOp::BitAnd, left, right);
        }
        Ok(left)
    }

    fn equality(&mut self) -> Result<Expr, DebugError> {
        let mut left = self.relational()?;
        loop {
            let op = match self.peek() {
                Some(TokenKind::EqEq) => BinaryOp::Eq,
                Some(TokenKind::BangEq) => BinaryOp::Ne,
                _ => break,
            };
            self.pos += 1;
            let right = self.relational()?;
            left = binary(op, left, right);
        }
        Ok(left)
    }

    fn relational(&mut self) -> Result<Expr, DebugError> {
        let mut left = self.shift()?;
        loop {
            let op = match self.peek() {
                Some(TokenKind::Less) => BinaryOp::Lt,
                Some(TokenKind::LessEq) => BinaryOp::Le,
                Some(TokenKind::Greater) => BinaryOp::Gt,
                Some(TokenKind::GreaterEq) => BinaryOp::Ge,
                _ => break,
            };
            self.pos += 1;
            let right = self.shift()?;
            left = binary(op, left, right);
        }
        Ok(left)
    }

    fn shift(&mut self) -> Result<Expr, DebugError> {
        let mut left = self.additive()?;
        loop {
            let op = match self.peek() {
                Some(TokenKind::Shl) => BinaryOp::Shl,
                Some(TokenKind::Shr) => BinaryOp::Shr,
                _ => break,
            };
            self.pos += 1;
            let right = self.additive()?;
            left = binary(op, left, right);
        }
        Ok(left)
    }

    fn additive(&mut self) -> Result<Expr, DebugError> {
        let mut left = self.multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(TokenKind::Plus) => BinaryOp::Add,
                Some(TokenKind::Minus) => BinaryOp::Sub,
                _ => break,
            };
            self.pos += 1;
            let right = self.multiplicative()?;
            left = binary(op, left, right);
        }
        Ok(left)
    }

    fn multiplicative(&mut self) -> Result<Expr, DebugError> {
        let mut left = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(TokenKind::Star) => BinaryOp::Mul,
                Some(TokenKind::Slash) => BinaryOp::Div,
                Some(TokenKind::Percent) => BinaryOp::Mod,
                _ => break,
            };
            self.pos += 1;
            let right = self.unary()?;
            left = binary(op, left, right);
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr, DebugError> {
        self.enter()?;
        let result = self.unary_inner();
        self.depth -= 1;
        result
    }

    fn unary_inner(&mut self) -> Result<Expr, DebugError> {
        let op = match self.peek() {
            Some(TokenKind::Plus) => Some(UnaryOp::Plus),
            Some(TokenKind::Minus) => Some(UnaryOp::Minus),
            Some(TokenKind::Bang) => Some(UnaryOp::Not),
            Some(TokenKind::Tilde) => Some(UnaryOp::Complement),
            _ => None,
        };
        if let Some(op) = op {
            self.pos += 1;
            let operand = self.unary()?;
            return Ok(Expr::Unary {
                op,
                operand: Box::new(operand),
            });
        }
        if let Some(cast) = self.try_cast()? {
            return Ok(cast);
        }
        self.postfix()
    }

    /// A parenthesised name is a cast when the name is a type keyword, or a
    /// dotted name followed by the start of an operand. `(x) + 1` stays a
    /// parenthesised expression.
    fn try_cast(&mut self) -> Result<Option<Expr>, DebugError> {
        if self.peek() != Some(TokenKind::LParen) {
            return Ok(None);
        }
        let start = self.pos;
        self.pos += 1;

        let Some(name) = self.dotted_name() else {
            self.pos = start;
            return Ok(None);
        };
        if !self.eat(TokenKind::RParen) {
            self.pos = start;
            return Ok(None);
        }

        let is_keyword = keyword_type(&name).is_some();
        let operand_follows = matches!(
            self.peek(),
            Some(
                TokenKind::Ident
                    | TokenKind::IntLiteral
                    | TokenKind::HexLiteral
                    | TokenKind::FloatLiteral
                    | TokenKind::StringLiteral
                    | TokenKind::CharLiteral
                    | TokenKind::LParen
                    | TokenKind::Bang
                    | TokenKind::Tilde
            )
        );
        let is_dotted = name.contains('.');
        if !(is_keyword || (is_dotted && operand_follows)) {
            self.pos = start;
            return Ok(None);
        }
        if !operand_follows {
            self.pos = start;
            return Ok(None);
        }

        let operand = self.unary()?;
        Ok(Some(Expr::Cast {
            target: SmolStr::new(name),
            operand: Box::new(operand),
        }))
    }

    fn dotted_name(&mut self) -> Option<String> {
        if self.peek() != Some(TokenKind::Ident) {
            return None;
        }
        let mut name = self.bump()?.text.clone();
        while self.peek() == Some(TokenKind::Dot) {
            let dot_pos = self.pos;
            self.pos += 1;
            if self.peek() == Some(TokenKind::Ident) {
                let part = self.bump().map(|token| token.text.clone())?;
                name.push('.');
                name.push_str(&part);
            } else {
                self.pos = dot_pos;
                break;
            }
        }
        Some(name)
    }

    fn postfix(&mut self) -> Result<Expr, DebugError> {
        let mut expr = self.primary()?;
        loop {
            match self.peek() {
                Some(TokenKind::Dot) => {
                    self.pos += 1;
                    let name = self.ident("member name")?;
                    if self.peek() == Some(TokenKind::LParen) {
                        let args = self.call_args()?;
                        expr = Expr::Call {
                            target: Some(Box::new(expr)),
                            name,
                            args,
                        };
                    } else {
                        expr = Expr::Member {
                            target: Box::new(expr),
                            name,
                        };
                    }
                }
                Some(TokenKind::LBracket) => {
                    self.pos += 1;
                    let mut indices = vec![self.conditional()?];
                    while self.eat(TokenKind::Comma) {
                        indices.push(self.conditional()?);
                    }
                    self.expect(TokenKind::RBracket, "']'")?;
                    expr = Expr::Index {
                        target: Box::new(expr),
                        indices,
                    };
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn primary(&mut self) -> Result<Expr, DebugError> {
        match self.peek() {
            Some(TokenKind::LParen) => {
                self.pos += 1;
                let expr = self.conditional()?;
                self.expect(TokenKind::RParen, "')'")?;
                Ok(expr)
            }
            Some(TokenKind::IntLiteral) => {
                let text = self.bump().map(|token| token.text.clone()).unwrap_or_default();
                parse_int(&text, 10)
            }
            Some(TokenKind::HexLiteral) => {
                let text = self.bump().map(|token| token.text.clone()).unwrap_or_default();
                parse_int(text.trim_start_matches("0x").trim_start_matches("0X"), 16)
            }
            Some(TokenKind::FloatLiteral) => {
                let text = self.bump().map(|token| token.text.clone()).unwrap_or_default();
                parse_float(&text)
            }
            Some(TokenKind::StringLiteral) => {
                let text = self.bump().map(|token| token.text.clone()).unwrap_or_default();
                Ok(Expr::Str(SmolStr::new(unescape(
                    &text[1..text.len() - 1],
                ))))
            }
            Some(TokenKind::CharLiteral) => {
                let text = self.bump().map(|token| token.text.clone()).unwrap_or_default();
                let inner = unescape(&text[1..text.len() - 1]);
                let unit = inner.encode_utf16().next().ok_or_else(|| {
                    DebugError::Type("empty character literal".into())
                })?;
                Ok(Expr::Char(unit))
            }
            Some(TokenKind::Ident) => {
                let name = self.ident("identifier")?;
                match name.as_str() {
                    "true" => Ok(Expr::Bool(true)),
                    "false" => Ok(Expr::Bool(false)),
                    "null" => Ok(Expr::Null),
                    _ => {
                        if self.peek() == Some(TokenKind::LParen) {
                            let args = self.call_args()?;
                            Ok(Expr::Call {
                                target: None,
                                name,
                                args,
                            })
                        } else {
                            Ok(Expr::Ident(name))
                        }
                    }
                }
            }
            _ => Err(DebugError::Type(
                format!("expected expression before '{}'", self.current_text()).into(),
            )),
        }
    }

    fn call_args(&mut self) -> Result<Vec<Expr>, DebugError> {
        self.expect(TokenKind::LParen, "'('")?;
        let mut args = Vec::new();
        if self.eat(TokenKind::RParen) {
            return Ok(args);
        }
        loop {
            args.push(self.conditional()?);
            if self.eat(TokenKind::Comma) {
                continue;
            }
            self.expect(TokenKind::RParen, "')'")?;
            break;
        }
        Ok(args)
    }

    fn ident(&mut self, what: &str) -> Result<SmolStr, DebugError> {
        if self.peek() == Some(TokenKind::Ident) {
            let text = self.bump().map(|token| token.text.clone()).unwrap_or_default();
            Ok(SmolStr::new(text))
        } else {
            Err(DebugError::Type(
                format!("expected {what} before '{}'", self.current_text()).into(),
            ))
        }
    }
}

fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    Expr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

fn parse_int(digits: &str, radix: u32) -> Result<Expr, DebugError> {
    let is_long_suffix = digits.ends_with('l') || digits.ends_with('L');
    let digits = digits.trim_end_matches(['l', 'L']);
    let value = i64::from_str_radix(digits, radix)
        .map_err(|_| DebugError::Type("integer literal out of range".into()))?;
    let is_long = is_long_suffix || i32::try_from(value).is_err();
    Ok(Expr::Int { value, is_long })
}

fn parse_float(text: &str) -> Result<Expr, DebugError> {
    let is_double = !(text.ends_with('f') || text.ends_with('F'));
    let digits = text.trim_end_matches(['f', 'F', 'd', 'D']);
    let value: f64 = digits
        .parse()
        .map_err(|_| DebugError::Type("malformed floating-point literal".into()))?;
    Ok(Expr::Float { value, is_double })
}

fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('0') => out.push('\0'),
            Some('\\') => out.push('\\'),
            Some('"') => out.push('"'),
            Some('\'') => out.push('\''),
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}
