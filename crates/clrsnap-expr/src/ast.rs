//! Parsed expression tree.

use smol_str::SmolStr;

/// Binary operators of the subset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    /// Short-circuiting `&&`.
    And,
    /// Short-circuiting `||`.
    Or,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl BinaryOp {
    #[must_use]
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
        }
    }
}

/// Unary operators of the subset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Plus,
    Minus,
    /// Logical `!`.
    Not,
    /// Bitwise `~`.
    Complement,
}

/// Expression node.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Int {
        value: i64,
        is_long: bool,
    },
    Float {
        value: f64,
        is_double: bool,
    },
    Str(SmolStr),
    Char(u16),
    Bool(bool),
    Null,
    Ident(SmolStr),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Conditional {
        condition: Box<Expr>,
        if_true: Box<Expr>,
        if_false: Box<Expr>,
    },
    Cast {
        target: SmolStr,
        operand: Box<Expr>,
    },
    Member {
        target: Box<Expr>,
        name: SmolStr,
    },
    Index {
        target: Box<Expr>,
        indices: Vec<Expr>,
    },
    Call {
        /// Receiver expression; `None` for a bare `m(args)` call.
        target: Option<Box<Expr>>,
        name: SmolStr,
        args: Vec<Expr>,
    },
}

impl Expr {
    /// Try to read the subtree as a dotted type name (`Member(Member(
    /// Ident("System"), "Collections"), "Generic")` becomes
    /// `System.Collections.Generic`). Anything else is not a type name.
    #[must_use]
    pub fn type_name(&self) -> Option<String> {
        match self {
            Expr::Ident(name) => Some(name.to_string()),
            Expr::Member { target, name } => {
                let prefix = target.type_name()?;
                Some(format!("{prefix}.{name}"))
            }
            _ => None,
        }
    }

    /// Height of the tree, for the recursion bound.
    #[must_use]
    pub fn depth(&self) -> usize {
        let children: Vec<&Expr> = match self {
            Expr::Unary { operand, .. } => vec![operand],
            Expr::Binary { left, right, .. } => vec![left, right],
            Expr::Conditional {
                condition,
                if_true,
                if_false,
            } => vec![condition, if_true, if_false],
            Expr::Cast { operand, .. } => vec![operand],
            Expr::Member { target, .. } => vec![target],
            Expr::Index { target, indices } => {
                let mut all: Vec<&Expr> = vec![target];
                all.extend(indices.iter());
                all
            }
            Expr::Call { target, args, .. } => {
                let mut all: Vec<&Expr> = Vec::new();
                if let Some(target) = target {
                    all.push(target);
                }
                all.extend(args.iter());
                all
            }
            _ => Vec::new(),
        };
        1 + children.iter().map(|child| child.depth()).max().unwrap_or(0)
    }
}
