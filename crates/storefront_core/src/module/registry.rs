//! Module discovery, activation and load ordering.
//!
//! # Responsibility
//! - Collect module candidates from ordered root directories.
//! - Resolve enabled state from overrides and settings (fail-closed).
//! - Cascade-disable modules whose declared dependencies are unsatisfied.
//! - Emit a deterministic dependency-first load order.
//!
//! # Invariants
//! - Module names are unique; the first discovered candidate wins.
//! - `enabled` holds only for opted-in modules whose declared dependencies
//!   are transitively enabled.
//! - Only registration descriptors contribute dependency edges.
//! - Output is `[enabled in topological order, disabled in discovery order]`.
//! - Discovery never fails: unreadable descriptors and cycles degrade.

use crate::module::descriptor::{
    has_module_descriptor, has_registration_descriptor, is_valid_module_name,
    read_module_descriptor, read_registration_descriptor, ModuleOrigin,
};
use crate::module::settings::ModuleSettings;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

/// One root directory scanned for modules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleRoot {
    pub path: PathBuf,
    #[serde(default)]
    pub origin: ModuleOrigin,
}

impl ModuleRoot {
    pub fn new(path: impl Into<PathBuf>, origin: ModuleOrigin) -> Self {
        Self {
            path: path.into(),
            origin,
        }
    }
}

/// A module found during scanning, before activation is resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleCandidate {
    pub name: String,
    pub location: PathBuf,
    pub origin: ModuleOrigin,
    /// Declared dependencies; `None` when the module has no registration descriptor.
    pub registration_dependencies: Option<Vec<String>>,
}

impl ModuleCandidate {
    /// Candidate without a registration descriptor.
    pub fn standalone(name: impl Into<String>, location: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            location: location.into(),
            origin: ModuleOrigin::Local,
            registration_dependencies: None,
        }
    }

    /// Candidate with a registration descriptor declaring `dependencies`.
    pub fn with_dependencies<I, S>(
        name: impl Into<String>,
        location: impl Into<PathBuf>,
        dependencies: I,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            location: location.into(),
            origin: ModuleOrigin::Local,
            registration_dependencies: Some(dependencies.into_iter().map(Into::into).collect()),
        }
    }
}

/// Resolved module state for one discovery pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleRecord {
    pub name: String,
    pub location: PathBuf,
    pub origin: ModuleOrigin,
    pub enabled: bool,
    pub declared_dependencies: Vec<String>,
    pub has_registration_descriptor: bool,
    /// Dependencies that were absent or disabled when this module was cascaded off.
    pub missing_dependencies: Vec<String>,
}

/// A candidate dropped because an earlier root already provided its name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShadowedModule {
    pub name: String,
    pub kept_location: PathBuf,
    pub ignored_location: PathBuf,
}

/// Inputs for one discovery pass.
#[derive(Debug, Clone, Default)]
pub struct DiscoveryOptions {
    /// Scanned in order; earlier roots take precedence on name collisions.
    pub roots: Vec<ModuleRoot>,
    /// Per-call overrides, consulted before `settings`.
    pub overrides: BTreeMap<String, bool>,
    pub settings: ModuleSettings,
}

/// Result of one discovery pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Discovery {
    /// Enabled records in load order followed by disabled records.
    pub modules: Vec<ModuleRecord>,
    pub shadowed: Vec<ShadowedModule>,
    /// Dependency cycles found among enabled modules, as name chains.
    pub cycles: Vec<Vec<String>>,
}

impl Discovery {
    pub fn enabled(&self) -> impl Iterator<Item = &ModuleRecord> {
        self.modules.iter().filter(|record| record.enabled)
    }

    pub fn disabled(&self) -> impl Iterator<Item = &ModuleRecord> {
        self.modules.iter().filter(|record| !record.enabled)
    }

    pub fn enabled_names(&self) -> Vec<&str> {
        self.enabled().map(|record| record.name.as_str()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&ModuleRecord> {
        self.modules.iter().find(|record| record.name == name)
    }
}

/// Scans `options.roots` and resolves activation and load order.
pub fn discover(options: &DiscoveryOptions) -> Discovery {
    let candidates = scan_roots(&options.roots);
    resolve_candidates(candidates, &options.overrides, &options.settings)
}

/// Collects candidates from every root in order. Duplicates are kept here;
/// `resolve_candidates` applies first-seen-wins.
pub fn scan_roots(roots: &[ModuleRoot]) -> Vec<ModuleCandidate> {
    let mut candidates = Vec::new();
    for root in roots {
        for (dir, fallback_name) in module_dirs(&root.path) {
            candidates.push(read_candidate(&dir, fallback_name, root.origin));
        }
    }
    candidates
}

/// Applies dedup, enable resolution, dependency cascade and topological order.
pub fn resolve_candidates(
    candidates: Vec<ModuleCandidate>,
    overrides: &BTreeMap<String, bool>,
    settings: &ModuleSettings,
) -> Discovery {
    let mut records: Vec<ModuleRecord> = Vec::with_capacity(candidates.len());
    let mut shadowed = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for candidate in candidates {
        if let Some(&kept) = index.get(&candidate.name) {
            warn!(
                "event=module_shadowed module=registry status=warn name={} kept={} ignored={}",
                candidate.name,
                records[kept].location.display(),
                candidate.location.display()
            );
            shadowed.push(ShadowedModule {
                name: candidate.name,
                kept_location: records[kept].location.clone(),
                ignored_location: candidate.location,
            });
            continue;
        }

        let enabled = overrides
            .get(&candidate.name)
            .copied()
            .or_else(|| settings.get(&candidate.name))
            .unwrap_or(false);
        index.insert(candidate.name.clone(), records.len());
        records.push(ModuleRecord {
            name: candidate.name,
            location: candidate.location,
            origin: candidate.origin,
            enabled,
            has_registration_descriptor: candidate.registration_dependencies.is_some(),
            declared_dependencies: candidate.registration_dependencies.unwrap_or_default(),
            missing_dependencies: Vec::new(),
        });
    }

    cascade_disable(&mut records, &index);
    let (order, cycles) = topological_order(&records, &index);

    let mut modules: Vec<ModuleRecord> = Vec::with_capacity(records.len());
    let mut placed = vec![false; records.len()];
    for position in order {
        placed[position] = true;
        modules.push(records[position].clone());
    }
    for (position, record) in records.into_iter().enumerate() {
        if !placed[position] {
            modules.push(record);
        }
    }

    let enabled_count = modules.iter().filter(|record| record.enabled).count();
    info!(
        "event=module_discovery module=registry status=ok enabled={} disabled={} shadowed={} cycles={}",
        enabled_count,
        modules.len() - enabled_count,
        shadowed.len(),
        cycles.len()
    );

    Discovery {
        modules,
        shadowed,
        cycles,
    }
}

/// Disables descriptor-bearing modules with unsatisfied dependencies until a
/// full pass changes nothing.
fn cascade_disable(records: &mut [ModuleRecord], index: &HashMap<String, usize>) {
    loop {
        let mut changed = false;
        for position in 0..records.len() {
            let record = &records[position];
            if !record.enabled || !record.has_registration_descriptor {
                continue;
            }

            let missing: Vec<String> = record
                .declared_dependencies
                .iter()
                .filter(|dependency| {
                    !index
                        .get(dependency.as_str())
                        .is_some_and(|&target| records[target].enabled)
                })
                .cloned()
                .collect();
            if missing.is_empty() {
                continue;
            }

            info!(
                "event=module_cascade_disabled module=registry status=ok name={} missing={}",
                records[position].name,
                missing.join(",")
            );
            let record = &mut records[position];
            record.enabled = false;
            record.missing_dependencies = missing;
            changed = true;
        }
        if !changed {
            break;
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    InProgress,
    Done,
}

/// Depth-first order over enabled records. Cycles are reported and broken at
/// the back edge, leaving visitation order in place.
fn topological_order(
    records: &[ModuleRecord],
    index: &HashMap<String, usize>,
) -> (Vec<usize>, Vec<Vec<String>>) {
    let mut marks: HashMap<usize, Mark> = HashMap::new();
    let mut stack = Vec::new();
    let mut order = Vec::new();
    let mut cycles = Vec::new();

    for (position, record) in records.iter().enumerate() {
        if record.enabled {
            visit(
                position,
                records,
                index,
                &mut marks,
                &mut stack,
                &mut order,
                &mut cycles,
            );
        }
    }
    (order, cycles)
}

fn visit(
    position: usize,
    records: &[ModuleRecord],
    index: &HashMap<String, usize>,
    marks: &mut HashMap<usize, Mark>,
    stack: &mut Vec<usize>,
    order: &mut Vec<usize>,
    cycles: &mut Vec<Vec<String>>,
) {
    match marks.get(&position) {
        Some(Mark::Done) => return,
        Some(Mark::InProgress) => {
            let start = stack
                .iter()
                .position(|&entry| entry == position)
                .unwrap_or(0);
            let mut chain: Vec<String> = stack[start..]
                .iter()
                .map(|&entry| records[entry].name.clone())
                .collect();
            chain.push(records[position].name.clone());
            warn!(
                "event=module_cycle module=registry status=warn chain={}",
                chain.join("->")
            );
            cycles.push(chain);
            return;
        }
        None => {}
    }

    marks.insert(position, Mark::InProgress);
    stack.push(position);
    let record = &records[position];
    if record.has_registration_descriptor {
        for dependency in &record.declared_dependencies {
            if let Some(&target) = index.get(dependency) {
                if records[target].enabled {
                    visit(target, records, index, marks, stack, order, cycles);
                }
            }
        }
    }
    stack.pop();
    marks.insert(position, Mark::Done);
    order.push(position);
}

/// Module directories under `root` in sorted order, paired with the name to
/// use when the descriptor does not provide one. `@scope` directories are
/// searched one level deeper.
fn module_dirs(root: &Path) -> Vec<(PathBuf, String)> {
    let mut found = Vec::new();
    for (dir, dir_name) in sorted_subdirs(root) {
        if dir_name.starts_with('@') && !has_module_descriptor(&dir) {
            for (scoped_dir, scoped_name) in sorted_subdirs(&dir) {
                if has_module_descriptor(&scoped_dir) {
                    found.push((scoped_dir, format!("{dir_name}/{scoped_name}")));
                }
            }
            continue;
        }
        if has_module_descriptor(&dir) {
            found.push((dir, dir_name));
        }
    }
    found
}

fn sorted_subdirs(dir: &Path) -> Vec<(PathBuf, String)> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            debug!(
                "event=module_root_skipped module=registry status=warn root={} error={}",
                dir.display(),
                err
            );
            return Vec::new();
        }
    };

    let mut subdirs: Vec<(PathBuf, String)> = entries
        .filter_map(Result::ok)
        .filter(|entry| entry.path().is_dir())
        .filter_map(|entry| {
            let name = entry.file_name().to_str()?.to_string();
            Some((entry.path(), name))
        })
        .collect();
    subdirs.sort_by(|left, right| left.1.cmp(&right.1));
    subdirs
}

fn read_candidate(dir: &Path, fallback_name: String, origin: ModuleOrigin) -> ModuleCandidate {
    let name = match read_module_descriptor(dir) {
        Ok(descriptor) => descriptor
            .name
            .map(|name| name.trim().to_string())
            .filter(|name| is_valid_module_name(name))
            .unwrap_or(fallback_name),
        Err(err) => {
            warn!(
                "event=module_descriptor_invalid module=registry status=warn dir={} error={}",
                dir.display(),
                err
            );
            fallback_name
        }
    };

    let registration_dependencies = if has_registration_descriptor(dir) {
        match read_registration_descriptor(dir) {
            Ok(descriptor) => Some(descriptor.dependencies),
            Err(err) => {
                warn!(
                    "event=registration_descriptor_invalid module=registry status=warn name={} error={}",
                    name, err
                );
                Some(Vec::new())
            }
        }
    } else {
        None
    };

    ModuleCandidate {
        name,
        location: dir.to_path_buf(),
        origin,
        registration_dependencies,
    }
}

#[cfg(test)]
mod tests {
    use super::{resolve_candidates, ModuleCandidate};
    use crate::module::settings::ModuleSettings;
    use std::collections::{BTreeMap, HashSet};

    fn all_enabled(names: &[&str]) -> ModuleSettings {
        names.iter().map(|name| (name.to_string(), true)).collect()
    }

    fn names<'a>(records: impl Iterator<Item = &'a super::ModuleRecord>) -> Vec<&'a str> {
        records.map(|record| record.name.as_str()).collect()
    }

    #[test]
    fn cascades_disable_for_missing_dependency() {
        let candidates = vec![
            ModuleCandidate::with_dependencies("a", "/m/a", Vec::<String>::new()),
            ModuleCandidate::with_dependencies("b", "/m/b", ["a"]),
            ModuleCandidate::with_dependencies("c", "/m/c", ["z"]),
        ];
        let discovery =
            resolve_candidates(candidates, &BTreeMap::new(), &all_enabled(&["a", "b", "c"]));

        assert_eq!(names(discovery.enabled()), vec!["a", "b"]);
        assert_eq!(names(discovery.disabled()), vec!["c"]);
        let c = discovery.get("c").expect("c record");
        assert_eq!(c.missing_dependencies, vec!["z"]);
    }

    #[test]
    fn cascade_reaches_a_fixed_point_through_chains() {
        let candidates = vec![
            ModuleCandidate::with_dependencies("top", "/m/top", ["mid"]),
            ModuleCandidate::with_dependencies("mid", "/m/mid", ["base"]),
            ModuleCandidate::with_dependencies("base", "/m/base", Vec::<String>::new()),
        ];
        let settings = all_enabled(&["top", "mid"]);
        let discovery = resolve_candidates(candidates, &BTreeMap::new(), &settings);

        assert!(discovery.enabled_names().is_empty());
        assert_eq!(
            discovery.get("mid").expect("mid").missing_dependencies,
            vec!["base"]
        );
        assert_eq!(
            discovery.get("top").expect("top").missing_dependencies,
            vec!["mid"]
        );
    }

    #[test]
    fn modules_default_to_disabled() {
        let candidates = vec![ModuleCandidate::standalone("catalog", "/m/catalog")];
        let discovery = resolve_candidates(candidates, &BTreeMap::new(), &ModuleSettings::new());
        assert!(discovery.enabled_names().is_empty());
        assert_eq!(discovery.modules.len(), 1);
    }

    #[test]
    fn overrides_win_over_settings() {
        let candidates = vec![
            ModuleCandidate::standalone("catalog", "/m/catalog"),
            ModuleCandidate::standalone("cart", "/m/cart"),
        ];
        let mut overrides = BTreeMap::new();
        overrides.insert("catalog".to_string(), false);
        overrides.insert("cart".to_string(), true);
        let discovery =
            resolve_candidates(candidates, &overrides, &all_enabled(&["catalog"]));

        assert_eq!(discovery.enabled_names(), vec!["cart"]);
    }

    #[test]
    fn standalone_modules_are_never_cascaded() {
        let candidates = vec![ModuleCandidate::standalone("theme", "/m/theme")];
        let discovery =
            resolve_candidates(candidates, &BTreeMap::new(), &all_enabled(&["theme"]));
        assert_eq!(discovery.enabled_names(), vec!["theme"]);
    }

    #[test]
    fn first_discovered_name_wins_and_later_ones_are_reported() {
        let candidates = vec![
            ModuleCandidate::standalone("catalog", "/app/catalog"),
            ModuleCandidate::standalone("catalog", "/packages/catalog"),
        ];
        let discovery =
            resolve_candidates(candidates, &BTreeMap::new(), &all_enabled(&["catalog"]));

        assert_eq!(discovery.modules.len(), 1);
        assert_eq!(
            discovery.modules[0].location,
            std::path::PathBuf::from("/app/catalog")
        );
        assert_eq!(discovery.shadowed.len(), 1);
        assert_eq!(
            discovery.shadowed[0].ignored_location,
            std::path::PathBuf::from("/packages/catalog")
        );
    }

    #[test]
    fn dependencies_load_before_dependents() {
        let candidates = vec![
            ModuleCandidate::with_dependencies("checkout", "/m/checkout", ["cart", "catalog"]),
            ModuleCandidate::with_dependencies("cart", "/m/cart", ["catalog"]),
            ModuleCandidate::with_dependencies("catalog", "/m/catalog", Vec::<String>::new()),
        ];
        let discovery = resolve_candidates(
            candidates,
            &BTreeMap::new(),
            &all_enabled(&["checkout", "cart", "catalog"]),
        );
        assert_eq!(
            discovery.enabled_names(),
            vec!["catalog", "cart", "checkout"]
        );
    }

    #[test]
    fn cycles_are_reported_and_still_produce_an_order() {
        let candidates = vec![
            ModuleCandidate::with_dependencies("a", "/m/a", ["b"]),
            ModuleCandidate::with_dependencies("b", "/m/b", ["a"]),
            ModuleCandidate::standalone("c", "/m/c"),
        ];
        let discovery = resolve_candidates(
            candidates.clone(),
            &BTreeMap::new(),
            &all_enabled(&["a", "b", "c"]),
        );

        assert_eq!(discovery.enabled_names(), vec!["b", "a", "c"]);
        assert_eq!(discovery.cycles, vec![vec!["a", "b", "a"]]);

        let again =
            resolve_candidates(candidates, &BTreeMap::new(), &all_enabled(&["a", "b", "c"]));
        assert_eq!(again, discovery, "degraded order must stay deterministic");
    }

    #[test]
    fn disabled_records_follow_enabled_in_discovery_order() {
        let candidates = vec![
            ModuleCandidate::standalone("x", "/m/x"),
            ModuleCandidate::standalone("y", "/m/y"),
            ModuleCandidate::standalone("z", "/m/z"),
        ];
        let discovery = resolve_candidates(candidates, &BTreeMap::new(), &all_enabled(&["y"]));
        let ordered: Vec<&str> = discovery.modules.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(ordered, vec!["y", "x", "z"]);
    }

    #[test]
    fn enabled_set_matches_transitive_opt_in() {
        let candidates = vec![
            ModuleCandidate::with_dependencies("a", "/m/a", ["b"]),
            ModuleCandidate::with_dependencies("b", "/m/b", ["c"]),
            ModuleCandidate::with_dependencies("c", "/m/c", Vec::<String>::new()),
            ModuleCandidate::with_dependencies("d", "/m/d", ["a"]),
        ];
        let discovery = resolve_candidates(
            candidates,
            &BTreeMap::new(),
            &all_enabled(&["a", "b", "d"]),
        );
        let enabled: HashSet<&str> = discovery.enabled_names().into_iter().collect();
        assert!(enabled.is_empty());
        assert_eq!(
            discovery.get("d").expect("d").missing_dependencies,
            vec!["a"]
        );
    }
}
