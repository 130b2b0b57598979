//! Breakpoint resolution: `(file, line)` to `(module, method, IL offset)`.

use smol_str::SmolStr;

use clrsnap_runtime::surface::{MethodToken, ModuleRef, RuntimeModule};
use clrsnap_runtime::symbols::PdbMethod;

/// A resolved physical breakpoint site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSite {
    pub module: SmolStr,
    pub method: MethodToken,
    pub il_offset: u32,
    /// Document path the site resolved in.
    pub path: SmolStr,
    /// First source line of the chosen sequence point.
    pub line: u32,
}

/// Whether a PDB document path ends with the requested file.
///
/// Separators are normalised and the comparison is case-insensitive; the
/// match must start at a path-component boundary so `gram.cs` does not
/// match `Program.cs`.
#[must_use]
pub fn path_matches(document_path: &str, requested: &str) -> bool {
    let document = document_path.replace('\\', "/").to_ascii_lowercase();
    let requested = requested.replace('\\', "/").to_ascii_lowercase();
    if requested.is_empty() || !document.ends_with(&requested) {
        return false;
    }
    let boundary = document.len() - requested.len();
    boundary == 0
        || document.as_bytes()[boundary - 1] == b'/'
        || requested.starts_with('/')
}

/// Resolve a `(file, line)` against the symbols of the given modules.
///
/// Within a matching document, the method whose range covers the line and
/// whose `first_line` is largest wins; nested local functions and closures
/// sit inside their container's range, so the innermost candidate is the
/// intended one. The first sequence point covering the line provides the
/// IL offset. A location with no covering sequence point is unbindable.
#[must_use]
pub fn resolve_location(modules: &[ModuleRef], file: &str, line: u32) -> Option<ResolvedSite> {
    for module in modules {
        let Some(symbols) = module.symbols() else {
            continue;
        };
        for document in &symbols.documents {
            if !path_matches(&document.path, file) {
                continue;
            }
            let Some(method) = innermost_method(&document.methods, line) else {
                continue;
            };
            let Some(sequence_point) = method.sequence_point_for_line(line) else {
                continue;
            };
            return Some(ResolvedSite {
                module: module.name(),
                method: method.token,
                il_offset: sequence_point.il_offset,
                path: document.path.clone(),
                line: sequence_point.start_line,
            });
        }
    }
    None
}

fn innermost_method(methods: &[PdbMethod], line: u32) -> Option<&PdbMethod> {
    methods
        .iter()
        .filter(|method| method.first_line <= line && line <= method.last_line)
        .max_by_key(|method| method.first_line)
}

#[cfg(test)]
mod tests {
    use clrsnap_runtime::harness::SimModule;
    use clrsnap_runtime::symbols::{PdbDocument, PdbInfo, SequencePoint};

    use super::*;

    fn method(token: u32, first: u32, last: u32, points: Vec<SequencePoint>) -> PdbMethod {
        PdbMethod {
            token,
            first_line: first,
            last_line: last,
            sequence_points: points,
            locals: Vec::new(),
        }
    }

    fn seq(start: u32, end: u32, offset: u32) -> SequencePoint {
        SequencePoint {
            start_line: start,
            end_line: end,
            il_offset: offset,
        }
    }

    fn module_with(documents: Vec<PdbDocument>) -> Vec<ModuleRef> {
        let module = SimModule::new("/app/bin/app.dll");
        module.set_symbols(PdbInfo { documents });
        vec![module as ModuleRef]
    }

    #[test]
    fn filename_matching_is_suffix_based_and_case_insensitive() {
        assert!(path_matches("/src/App/Program.cs", "program.cs"));
        assert!(path_matches("C:\\src\\App\\Program.cs", "app/program.cs"));
        assert!(!path_matches("/src/App/Program.cs", "gram.cs"));
        assert!(!path_matches("/src/App/Program.cs", "Other.cs"));
        assert!(path_matches("/src/App/Program.cs", "/src/App/Program.cs"));
    }

    #[test]
    fn innermost_method_wins_for_nested_functions() {
        // A local function spans 12..=16 inside its container 8..=30.
        let modules = module_with(vec![PdbDocument {
            path: "/src/App/Program.cs".into(),
            methods: vec![
                method(1, 8, 30, vec![seq(9, 9, 0), seq(20, 20, 40)]),
                method(2, 12, 16, vec![seq(13, 14, 4)]),
            ],
        }]);

        let site = resolve_location(&modules, "Program.cs", 13).unwrap();
        assert_eq!(site.method, 2);
        assert_eq!(site.il_offset, 4);

        let outer = resolve_location(&modules, "Program.cs", 20).unwrap();
        assert_eq!(outer.method, 1);
        assert_eq!(outer.il_offset, 40);
    }

    #[test]
    fn first_covering_sequence_point_supplies_the_offset() {
        let modules = module_with(vec![PdbDocument {
            path: "/src/App/Program.cs".into(),
            methods: vec![method(
                1,
                5,
                20,
                vec![seq(5, 8, 0), seq(8, 12, 16), seq(14, 14, 32)],
            )],
        }]);
        let site = resolve_location(&modules, "Program.cs", 8).unwrap();
        assert_eq!(site.il_offset, 0);
        assert_eq!(site.line, 5);
    }

    #[test]
    fn lines_without_sequence_points_are_unbindable() {
        let modules = module_with(vec![PdbDocument {
            path: "/src/App/Program.cs".into(),
            methods: vec![method(1, 5, 20, vec![seq(5, 8, 0)])],
        }]);
        assert!(resolve_location(&modules, "Program.cs", 13).is_none());
        assert!(resolve_location(&modules, "Missing.cs", 6).is_none());
        assert!(resolve_location(&modules, "Program.cs", 50).is_none());
    }

    #[test]
    fn modules_without_symbols_are_skipped() {
        let bare = SimModule::new("/app/bin/bare.dll");
        let modules: Vec<ModuleRef> = vec![bare as ModuleRef];
        assert!(resolve_location(&modules, "Program.cs", 1).is_none());
    }
}
