//! Portable-PDB debug symbols, as the parser presents them.
//!
//! Section parsing lives outside the core; what arrives here is the already
//! decoded source-to-IL mapping: documents, methods, sequence points, and
//! local-variable names.

#![allow(missing_docs)]

use smol_str::SmolStr;

/// Decoded symbol view of one module.
#[derive(Debug, Clone, Default)]
pub struct PdbInfo {
    pub documents: Vec<PdbDocument>,
}

/// A source document and the methods with code in it.
#[derive(Debug, Clone)]
pub struct PdbDocument {
    /// Document path as recorded by the compiler.
    pub path: SmolStr,
    pub methods: Vec<PdbMethod>,
}

/// Source mapping for one method body.
#[derive(Debug, Clone)]
pub struct PdbMethod {
    pub token: u32,
    /// First source line covered by the method body.
    pub first_line: u32,
    /// Last source line covered by the method body.
    pub last_line: u32,
    pub sequence_points: Vec<SequencePoint>,
    pub locals: Vec<PdbLocal>,
}

/// A `(source range, IL offset)` association.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequencePoint {
    pub start_line: u32,
    pub end_line: u32,
    pub il_offset: u32,
}

/// Name record for a local-variable slot.
#[derive(Debug, Clone)]
pub struct PdbLocal {
    pub slot: u32,
    pub name: SmolStr,
    /// Compiler-emitted locals the debugger should not surface.
    pub hidden: bool,
}

impl PdbMethod {
    /// The first sequence point whose line range includes `line`.
    #[must_use]
    pub fn sequence_point_for_line(&self, line: u32) -> Option<&SequencePoint> {
        self.sequence_points
            .iter()
            .find(|sp| sp.start_line <= line && line <= sp.end_line)
    }

    /// Name of the local in `slot`, if the PDB recorded one.
    #[must_use]
    pub fn local_name(&self, slot: u32) -> Option<&PdbLocal> {
        self.locals.iter().find(|local| local.slot == slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_point_lookup_picks_first_covering() {
        let method = PdbMethod {
            token: 0x0600_0001,
            first_line: 10,
            last_line: 20,
            sequence_points: vec![
                SequencePoint {
                    start_line: 10,
                    end_line: 11,
                    il_offset: 0,
                },
                SequencePoint {
                    start_line: 11,
                    end_line: 14,
                    il_offset: 8,
                },
            ],
            locals: Vec::new(),
        };
        assert_eq!(method.sequence_point_for_line(11).unwrap().il_offset, 0);
        assert_eq!(method.sequence_point_for_line(13).unwrap().il_offset, 8);
        assert!(method.sequence_point_for_line(21).is_none());
    }
}
