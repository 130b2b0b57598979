//! Breakpoint registry: logical breakpoints multiplexed onto physical
//! armings.

use std::sync::Mutex;

use glob::{MatchOptions, Pattern};
use smol_str::SmolStr;
use tracing::{debug, info, warn};

use clrsnap_runtime::error::DebugError;
use clrsnap_runtime::surface::{BreakpointRef, ModuleRef, NativeBreakpoint, RuntimeModule};

use crate::resolve::{path_matches, resolve_location, ResolvedSite};

/// Lifecycle of a logical breakpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakpointState {
    /// No PDB site found yet; re-attempted on module load.
    Unresolved,
    /// Bound to a site but not armed.
    Resolved,
    /// Bound and the physical arming is live.
    Armed,
    /// Bound, individually disabled.
    Disarmed,
    /// Permanently withdrawn.
    Retired,
}

/// A set-breakpoint request, as it arrives from the wire.
#[derive(Debug, Clone)]
pub struct BreakpointSpec {
    pub id: SmolStr,
    pub file: SmolStr,
    pub line: u32,
    pub column: u32,
    pub condition: Option<SmolStr>,
    pub enabled: bool,
}

/// A logical breakpoint.
#[derive(Debug, Clone)]
pub struct DbgBreakpoint {
    pub id: SmolStr,
    pub file: SmolStr,
    pub line: u32,
    pub column: u32,
    pub condition: Option<SmolStr>,
    pub enabled: bool,
    pub state: BreakpointState,
    pub site: Option<ResolvedSite>,
}

impl DbgBreakpoint {
    fn from_spec(spec: BreakpointSpec) -> Self {
        Self {
            id: spec.id,
            file: spec.file,
            line: spec.line,
            column: spec.column,
            condition: spec.condition,
            enabled: spec.enabled,
            state: BreakpointState::Unresolved,
            site: None,
        }
    }
}

/// The de-duplicated physical site with its logical breakpoints.
struct LocationEntry {
    site: ResolvedSite,
    native: BreakpointRef,
    logical: Vec<DbgBreakpoint>,
}

impl LocationEntry {
    /// Re-establish the aggregate invariant: the native arming is active
    /// iff any logical breakpoint here is enabled.
    fn sync_arming(&mut self) -> Result<(), DebugError> {
        let should_arm = self
            .logical
            .iter()
            .any(|bp| bp.enabled && bp.state != BreakpointState::Retired);
        if self.native.is_active() != should_arm {
            self.native.activate(should_arm)?;
        }
        for bp in &mut self.logical {
            if bp.state == BreakpointState::Retired {
                continue;
            }
            bp.state = if bp.enabled && should_arm {
                BreakpointState::Armed
            } else {
                BreakpointState::Disarmed
            };
        }
        Ok(())
    }
}

struct RegistryInner {
    locations: Vec<LocationEntry>,
    unresolved: Vec<DbgBreakpoint>,
    disabled: bool,
}

/// Result of applying a set-breakpoint request.
#[derive(Debug, Clone)]
pub struct SetOutcome {
    pub resolved: bool,
    pub armed: bool,
    pub site: Option<ResolvedSite>,
}

/// Mutex-guarded collection of breakpoint locations.
pub struct BreakpointRegistry {
    inner: Mutex<RegistryInner>,
}

impl Default for BreakpointRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl BreakpointRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                locations: Vec::new(),
                unresolved: Vec::new(),
                disabled: false,
            }),
        }
    }

    /// Apply a set-breakpoint request: update an existing logical
    /// breakpoint by id, or resolve and (maybe) arm a new one.
    pub fn set_breakpoint(
        &self,
        modules: &[ModuleRef],
        spec: BreakpointSpec,
    ) -> Result<SetOutcome, DebugError> {
        let mut inner = self.lock();
        if inner.disabled {
            return Err(DebugError::Shutdown);
        }

        // An existing resolved breakpoint with the same id only changes its
        // enabled flag and condition; the location keeps one arming.
        for entry in &mut inner.locations {
            if let Some(bp) = entry.logical.iter_mut().find(|bp| bp.id == spec.id) {
                bp.enabled = spec.enabled;
                bp.condition = spec.condition.clone();
                entry.sync_arming()?;
                debug!(id = %spec.id, armed = entry.native.is_active(), "updated breakpoint");
                return Ok(SetOutcome {
                    resolved: true,
                    armed: entry.native.is_active(),
                    site: Some(entry.site.clone()),
                });
            }
        }
        inner.unresolved.retain(|bp| bp.id != spec.id);

        match resolve_location(modules, &spec.file, spec.line) {
            Some(site) => {
                let module = modules
                    .iter()
                    .find(|module| module.name() == site.module)
                    .cloned()
                    .ok_or_else(|| DebugError::internal("resolved site names unknown module"))?;
                let mut bp = DbgBreakpoint::from_spec(spec);
                bp.state = BreakpointState::Resolved;
                bp.site = Some(site.clone());
                let armed = Self::attach(&mut inner, &module, site.clone(), bp)?;
                Ok(SetOutcome {
                    resolved: true,
                    armed,
                    site: Some(site),
                })
            }
            None => {
                info!(id = %spec.id, file = %spec.file, line = spec.line, "breakpoint is unbindable for now");
                inner.unresolved.push(DbgBreakpoint::from_spec(spec));
                Ok(SetOutcome {
                    resolved: false,
                    armed: false,
                    site: None,
                })
            }
        }
    }

    /// The site and enabled logical breakpoints behind a physical hit.
    #[must_use]
    pub fn find_hit(&self, native_id: u64) -> Option<(ResolvedSite, Vec<DbgBreakpoint>)> {
        let inner = self.lock();
        let entry = inner
            .locations
            .iter()
            .find(|entry| entry.native.id() == native_id)?;
        let active: Vec<DbgBreakpoint> = entry
            .logical
            .iter()
            .filter(|bp| bp.enabled && bp.state == BreakpointState::Armed)
            .cloned()
            .collect();
        Some((entry.site.clone(), active))
    }

    /// Re-attempt resolution of unbound breakpoints against a new module.
    pub fn on_module_load(&self, module: &ModuleRef) {
        let mut inner = self.lock();
        if inner.disabled {
            return;
        }
        let pending = std::mem::take(&mut inner.unresolved);
        let single = [module.clone()];
        for mut bp in pending {
            if !module_matches_file(module, &bp.file) {
                inner.unresolved.push(bp);
                continue;
            }
            match resolve_location(&single, &bp.file, bp.line) {
                Some(site) => {
                    info!(id = %bp.id, path = %site.path, "late-bound breakpoint");
                    bp.state = BreakpointState::Resolved;
                    bp.site = Some(site.clone());
                    if let Err(err) = Self::attach(&mut inner, module, site, bp) {
                        warn!(error = %err, "failed to arm late-bound breakpoint");
                    }
                }
                None => inner.unresolved.push(bp),
            }
        }
    }

    /// Disarm everything and refuse further arming.
    pub fn retire_all(&self) {
        let mut inner = self.lock();
        inner.disabled = true;
        for entry in &mut inner.locations {
            if let Err(err) = entry.native.activate(false) {
                warn!(error = %err, "failed to disarm breakpoint during shutdown");
            }
            for bp in &mut entry.logical {
                bp.state = BreakpointState::Retired;
            }
        }
        for bp in &mut inner.unresolved {
            bp.state = BreakpointState::Retired;
        }
    }

    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.lock().disabled
    }

    /// Current state of a logical breakpoint.
    #[must_use]
    pub fn breakpoint_state(&self, id: &str) -> Option<BreakpointState> {
        let inner = self.lock();
        inner
            .locations
            .iter()
            .flat_map(|entry| entry.logical.iter())
            .chain(inner.unresolved.iter())
            .find(|bp| bp.id == id)
            .map(|bp| bp.state)
    }

    /// `(site, armed, logical count)` per location, for inspection.
    #[must_use]
    pub fn locations(&self) -> Vec<(ResolvedSite, bool, usize)> {
        self.lock()
            .locations
            .iter()
            .map(|entry| {
                (
                    entry.site.clone(),
                    entry.native.is_active(),
                    entry.logical.len(),
                )
            })
            .collect()
    }

    fn attach(
        inner: &mut RegistryInner,
        module: &ModuleRef,
        site: ResolvedSite,
        bp: DbgBreakpoint,
    ) -> Result<bool, DebugError> {
        if let Some(entry) = inner.locations.iter_mut().find(|entry| entry.site == site) {
            entry.logical.push(bp);
            entry.sync_arming()?;
            return Ok(entry.native.is_active());
        }

        let native = module.arm_breakpoint(site.method, site.il_offset)?;
        let mut entry = LocationEntry {
            site,
            native,
            logical: vec![bp],
        };
        entry.sync_arming()?;
        let armed = entry.native.is_active();
        inner.locations.push(entry);
        Ok(armed)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RegistryInner> {
        self.inner.lock().expect("breakpoint registry poisoned")
    }
}

/// Quick check whether a module's documents could satisfy a file pattern.
fn module_matches_file(module: &ModuleRef, file: &str) -> bool {
    let Some(symbols) = module.symbols() else {
        return false;
    };
    let options = MatchOptions {
        case_sensitive: false,
        ..MatchOptions::new()
    };
    let pattern = Pattern::new(&format!("**/{file}")).ok();
    symbols.documents.iter().any(|document| {
        let normalised = document.path.replace('\\', "/");
        pattern
            .as_ref()
            .is_some_and(|pattern| pattern.matches_with(&normalised, options))
            || path_matches(&document.path, file)
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use clrsnap_runtime::harness::SimModule;
    use clrsnap_runtime::surface::NativeBreakpoint;
    use clrsnap_runtime::symbols::{PdbDocument, PdbInfo, PdbMethod, SequencePoint};

    use super::*;

    fn spec(id: &str, file: &str, line: u32, enabled: bool) -> BreakpointSpec {
        BreakpointSpec {
            id: id.into(),
            file: file.into(),
            line,
            column: 0,
            condition: None,
            enabled,
        }
    }

    fn module_with_method() -> Arc<SimModule> {
        let module = SimModule::new("/app/bin/app.dll");
        module.set_symbols(PdbInfo {
            documents: vec![PdbDocument {
                path: "/src/App/Program.cs".into(),
                methods: vec![PdbMethod {
                    token: 0x0600_0001,
                    first_line: 5,
                    last_line: 30,
                    sequence_points: vec![SequencePoint {
                        start_line: 12,
                        end_line: 14,
                        il_offset: 8,
                    }],
                    locals: Vec::new(),
                }],
            }],
        });
        module
    }

    #[test]
    fn two_breakpoints_share_one_arming() {
        let module = module_with_method();
        let modules: Vec<ModuleRef> = vec![module.clone()];
        let registry = BreakpointRegistry::new();

        let first = registry
            .set_breakpoint(&modules, spec("bp-1", "Program.cs", 12, true))
            .unwrap();
        let second = registry
            .set_breakpoint(&modules, spec("bp-2", "Program.cs", 13, true))
            .unwrap();
        assert!(first.armed && second.armed);

        // Same resolved tuple, one physical breakpoint.
        assert_eq!(module.armed().len(), 1);
        let locations = registry.locations();
        assert_eq!(locations.len(), 1);
        assert_eq!(locations[0].2, 2);

        // Disabling one keeps the arming; disabling both drops it.
        registry
            .set_breakpoint(&modules, spec("bp-1", "Program.cs", 12, false))
            .unwrap();
        assert!(registry.locations()[0].1);
        assert_eq!(
            registry.breakpoint_state("bp-1"),
            Some(BreakpointState::Disarmed)
        );
        registry
            .set_breakpoint(&modules, spec("bp-2", "Program.cs", 13, false))
            .unwrap();
        assert!(!registry.locations()[0].1);

        // Re-enabling re-arms the shared location.
        registry
            .set_breakpoint(&modules, spec("bp-2", "Program.cs", 13, true))
            .unwrap();
        assert!(registry.locations()[0].1);
        assert_eq!(
            registry.breakpoint_state("bp-2"),
            Some(BreakpointState::Armed)
        );
    }

    #[test]
    fn unbindable_breakpoints_wait_for_module_load() {
        let registry = BreakpointRegistry::new();
        let outcome = registry
            .set_breakpoint(&[], spec("bp-1", "Program.cs", 12, true))
            .unwrap();
        assert!(!outcome.resolved);
        assert_eq!(
            registry.breakpoint_state("bp-1"),
            Some(BreakpointState::Unresolved)
        );

        let module = module_with_method();
        let module_ref: ModuleRef = module.clone();
        registry.on_module_load(&module_ref);
        assert_eq!(
            registry.breakpoint_state("bp-1"),
            Some(BreakpointState::Armed)
        );
        assert_eq!(module.armed().len(), 1);
    }

    #[test]
    fn module_load_ignores_non_matching_files() {
        let registry = BreakpointRegistry::new();
        registry
            .set_breakpoint(&[], spec("bp-1", "Other.cs", 12, true))
            .unwrap();
        let module: ModuleRef = module_with_method();
        registry.on_module_load(&module);
        assert_eq!(
            registry.breakpoint_state("bp-1"),
            Some(BreakpointState::Unresolved)
        );
    }

    #[test]
    fn hits_surface_only_enabled_logicals() {
        let module = module_with_method();
        let modules: Vec<ModuleRef> = vec![module.clone()];
        let registry = BreakpointRegistry::new();
        registry
            .set_breakpoint(&modules, spec("bp-1", "Program.cs", 12, true))
            .unwrap();
        registry
            .set_breakpoint(&modules, spec("bp-2", "Program.cs", 12, false))
            .unwrap();

        let native_id = module.armed()[0].id();
        let (site, hits) = registry.find_hit(native_id).unwrap();
        assert_eq!(site.il_offset, 8);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "bp-1");
        assert!(registry.find_hit(native_id + 999).is_none());
    }

    #[test]
    fn retirement_disarms_and_refuses_new_work() {
        let module = module_with_method();
        let modules: Vec<ModuleRef> = vec![module.clone()];
        let registry = BreakpointRegistry::new();
        registry
            .set_breakpoint(&modules, spec("bp-1", "Program.cs", 12, true))
            .unwrap();

        registry.retire_all();
        assert!(!registry.locations()[0].1);
        assert_eq!(
            registry.breakpoint_state("bp-1"),
            Some(BreakpointState::Retired)
        );
        assert!(matches!(
            registry.set_breakpoint(&modules, spec("bp-3", "Program.cs", 12, true)),
            Err(DebugError::Shutdown)
        ));
    }
}
