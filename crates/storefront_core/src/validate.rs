//! Post-hoc consistency checks over flattened composition output.
//!
//! Pure and advisory: never panics, never mutates, every finding is data.

use crate::composition::tree::{ComponentRef, RegionMap};
use crate::extension::points::ExtensionMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    UnknownRegion,
    DuplicateRegionId,
    /// Component held by value; cannot be serialized across server/client.
    DirectComponentReference,
    UnregisteredComponent,
    DuplicateExtensionId,
}

impl IssueKind {
    /// Suggested severity; callers decide how to act on it.
    pub fn default_severity(self) -> Severity {
        match self {
            Self::UnknownRegion | Self::DuplicateExtensionId => Severity::Warn,
            Self::DuplicateRegionId
            | Self::DirectComponentReference
            | Self::UnregisteredComponent => Severity::Error,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub kind: IssueKind,
    pub severity: Severity,
    /// Region name, or `host/outlet` for extension findings.
    pub location: String,
    pub id: Option<String>,
    pub message: String,
}

impl Issue {
    fn new(kind: IssueKind, location: &str, id: Option<&str>, message: String) -> Self {
        Self {
            kind,
            severity: kind.default_severity(),
            location: location.to_string(),
            id: id.map(str::to_string),
            message,
        }
    }
}

/// Checks flattened regions and extensions.
///
/// `known_regions` of `None` disables the unknown-region check.
pub fn validate_artifact<F>(
    regions: &RegionMap,
    extensions: &ExtensionMap,
    component_exists: F,
    known_regions: Option<&BTreeSet<String>>,
) -> Vec<Issue>
where
    F: Fn(&str) -> bool,
{
    let mut issues = Vec::new();

    for (region, entries) in regions {
        if let Some(allowlist) = known_regions {
            if !allowlist.contains(region) {
                issues.push(Issue::new(
                    IssueKind::UnknownRegion,
                    region,
                    None,
                    format!("region `{region}` is not in the known region list"),
                ));
            }
        }

        let mut seen = HashSet::new();
        for entry in entries {
            if !seen.insert(entry.id.as_str()) {
                issues.push(Issue::new(
                    IssueKind::DuplicateRegionId,
                    region,
                    Some(&entry.id),
                    format!("id `{}` appears more than once in region `{region}`", entry.id),
                ));
            }
            check_component(&entry.component, region, &entry.id, &component_exists, &mut issues);
        }
    }

    for (host, outlets) in extensions {
        for (outlet, entries) in outlets {
            let location = format!("{host}/{outlet}");
            let mut seen = HashSet::new();
            for entry in entries {
                if !seen.insert(entry.id.as_str()) {
                    issues.push(Issue::new(
                        IssueKind::DuplicateExtensionId,
                        &location,
                        Some(&entry.id),
                        format!("extension id `{}` appears more than once in `{location}`", entry.id),
                    ));
                }
                check_component(
                    &entry.component,
                    &location,
                    &entry.id,
                    &component_exists,
                    &mut issues,
                );
            }
        }
    }

    issues
}

fn check_component<F>(
    component: &ComponentRef,
    location: &str,
    id: &str,
    component_exists: &F,
    issues: &mut Vec<Issue>,
) where
    F: Fn(&str) -> bool,
{
    match component {
        ComponentRef::Direct { type_name } => issues.push(Issue::new(
            IssueKind::DirectComponentReference,
            location,
            Some(id),
            format!("`{id}` references component `{type_name}` directly instead of by name"),
        )),
        ComponentRef::Named { name } if !component_exists(name) => issues.push(Issue::new(
            IssueKind::UnregisteredComponent,
            location,
            Some(id),
            format!("`{id}` references unregistered component `{name}`"),
        )),
        ComponentRef::Named { .. } => {}
    }
}

#[cfg(test)]
mod tests {
    use super::{validate_artifact, IssueKind, Severity};
    use crate::composition::ordering::OrderingHint;
    use crate::composition::tree::{ComponentRef, RegionEntry, RegionMap};
    use crate::extension::points::{ExtensionEntry, ExtensionMap};
    use std::collections::BTreeSet;

    fn region_entry(id: &str, component: ComponentRef) -> RegionEntry {
        RegionEntry {
            id: id.to_string(),
            path: format!("page.header.{id}"),
            component,
            ordering_hint: OrderingHint::default(),
            props: None,
            meta: None,
        }
    }

    fn extension_entry(id: &str, name: &str, seq: u64) -> ExtensionEntry {
        ExtensionEntry {
            id: id.to_string(),
            component: ComponentRef::named(name),
            priority: 0,
            enabled: true,
            seq,
            props: None,
            meta: None,
        }
    }

    fn registered(name: &str) -> bool {
        matches!(name, "Logo" | "Nav" | "Badge")
    }

    #[test]
    fn clean_artifact_has_no_issues() {
        let mut regions = RegionMap::new();
        regions.insert(
            "header".to_string(),
            vec![
                region_entry("logo", ComponentRef::named("Logo")),
                region_entry("nav", ComponentRef::named("Nav")),
            ],
        );
        let allowlist: BTreeSet<String> = ["header".to_string()].into_iter().collect();
        let issues = validate_artifact(&regions, &ExtensionMap::new(), registered, Some(&allowlist));
        assert!(issues.is_empty(), "unexpected issues: {issues:?}");
    }

    #[test]
    fn reports_every_issue_kind() {
        let mut regions = RegionMap::new();
        regions.insert(
            "sidebar".to_string(),
            vec![
                region_entry("logo", ComponentRef::named("Logo")),
                region_entry("logo", ComponentRef::named("Logo")),
                region_entry(
                    "inline",
                    ComponentRef::Direct {
                        type_name: "app::Widget".to_string(),
                    },
                ),
                region_entry("ghost", ComponentRef::named("Ghost")),
            ],
        );
        let mut extensions = ExtensionMap::new();
        extensions.entry("ProductCard".to_string()).or_default().insert(
            "badges".to_string(),
            vec![
                extension_entry("sale", "Badge", 0),
                extension_entry("sale", "Badge", 1),
            ],
        );
        let allowlist: BTreeSet<String> = ["header".to_string()].into_iter().collect();

        let issues = validate_artifact(&regions, &extensions, registered, Some(&allowlist));
        let kinds: Vec<IssueKind> = issues.iter().map(|issue| issue.kind).collect();
        assert_eq!(
            kinds,
            vec![
                IssueKind::UnknownRegion,
                IssueKind::DuplicateRegionId,
                IssueKind::DirectComponentReference,
                IssueKind::UnregisteredComponent,
                IssueKind::DuplicateExtensionId,
            ]
        );
        assert_eq!(issues[0].severity, Severity::Warn);
        assert_eq!(issues[4].location, "ProductCard/badges");
    }

    #[test]
    fn skips_region_check_without_allowlist() {
        let mut regions = RegionMap::new();
        regions.insert(
            "anything".to_string(),
            vec![region_entry("logo", ComponentRef::named("Logo"))],
        );
        let issues = validate_artifact(&regions, &ExtensionMap::new(), registered, None);
        assert!(issues.is_empty());
    }

    #[test]
    fn unregistered_extension_components_are_flagged() {
        let mut extensions = ExtensionMap::new();
        extensions
            .entry("Cart".to_string())
            .or_default()
            .insert("summary".to_string(), vec![extension_entry("gift", "GiftWrap", 0)]);
        let issues = validate_artifact(&RegionMap::new(), &extensions, registered, None);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].kind, IssueKind::UnregisteredComponent);
        assert_eq!(issues[0].id.as_deref(), Some("gift"));
    }
}
