//! Discovery report and pair proposal

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::roles::HubRole;
use crate::signals::{BackupScheduleState, ManagedClusterCount, RestoreState};
use crate::verifier::ConnectionVerification;

fn is_false(b: &bool) -> bool {
    !*b
}

/// Classification and signals of one fleet-management hub
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubReport {
    /// Context name
    pub context: String,
    /// API server URL
    pub server: String,
    /// Assigned role
    pub role: HubRole,
    /// Decision table row that matched
    pub rule: u8,
    /// Why the role was assigned
    pub rationale: String,
    /// Active backups alongside a passive-sync restore
    #[serde(default, skip_serializing_if = "is_false")]
    pub invalid_configuration: bool,
    /// Backup schedule state
    pub backup: BackupScheduleState,
    /// Latest restore state
    pub restore: RestoreState,
    /// Raw managed-cluster counts as reported by the hub
    pub managed_clusters: ManagedClusterCount,
    /// Names of the hub's managed clusters
    #[serde(default)]
    pub managed_cluster_names: Vec<String>,
}

/// Why a context was not classified
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SkipReason {
    /// Probe failed or timed out
    Unreachable,
    /// No fleet-management namespace
    NotAFleetHub,
    /// A client could not be built for the context
    ClientError,
    /// Reading the hub's signals failed
    InspectionFailed,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Unreachable => "unreachable",
            Self::NotAFleetHub => "not-a-fleet-hub",
            Self::ClientError => "client-error",
            Self::InspectionFailed => "inspection-failed",
        })
    }
}

/// A context left out of the classification table
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedContext {
    /// Context name
    pub context: String,
    /// Reason category
    pub reason: SkipReason,
    /// Error detail
    pub detail: String,
}

/// How sure the engine is about a proposed pair
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Confidence {
    /// One side was inferred from a fallback role
    Medium,
    /// Exactly one primary and exactly one secondary
    High,
}

/// Proposed (primary, secondary) pair for a switchover
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairProposal {
    /// Hub to switch away from
    pub primary: String,
    /// Hub to switch to
    pub secondary: String,
    /// Confidence of the weaker side
    pub confidence: Confidence,
}

/// Full discovery output
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryReport {
    /// Classified hubs, sorted by context
    pub hubs: Vec<HubReport>,
    /// Contexts that were not classified, sorted by context
    pub skipped: Vec<SkippedContext>,
    /// Highest-confidence pair, if one exists
    pub proposal: Option<PairProposal>,
    /// Advisory connection counts when hubs overlap
    pub verification: Option<ConnectionVerification>,
}

impl DiscoveryReport {
    /// Look up a hub by context name
    pub fn hub(&self, context: &str) -> Option<&HubReport> {
        self.hubs.iter().find(|h| h.context == context)
    }

    /// Render the report as a plain-text table
    pub fn render_table(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "{:<24} {:<12} {:<10} {:<22} {:<9} RATIONALE",
            "CONTEXT", "ROLE", "BACKUP", "RESTORE", "CLUSTERS"
        );
        for hub in &self.hubs {
            let _ = writeln!(
                out,
                "{:<24} {:<12} {:<10} {:<22} {:<9} {}",
                hub.context,
                hub.role.to_string(),
                hub.backup.to_string(),
                hub.restore.to_string(),
                hub.managed_clusters.to_string(),
                hub.rationale
            );
        }

        if !self.skipped.is_empty() {
            let _ = writeln!(out, "\nSkipped:");
            for s in &self.skipped {
                let _ = writeln!(out, "  {:<24} {:<18} {}", s.context, s.reason.to_string(), s.detail);
            }
        }

        if let Some(v) = &self.verification {
            let _ = writeln!(out, "\nVerified klusterlet connections:");
            for (hub, count) in &v.connected {
                let reported = self
                    .hub(hub)
                    .map(|h| h.managed_clusters.available)
                    .unwrap_or(0);
                let _ = writeln!(out, "  {hub:<24} connected={count} reported-available={reported}");
            }
            for u in &v.unknown {
                let _ = writeln!(out, "  {:<24} unknown: {}", u.cluster, u.reason);
            }
        }

        match &self.proposal {
            Some(p) => {
                let _ = writeln!(
                    out,
                    "\nProposed switchover: {} -> {} (confidence: {:?})",
                    p.primary, p.secondary, p.confidence
                );
            }
            None => {
                let _ = writeln!(out, "\nNo confident primary/secondary pair found");
            }
        }
        out
    }
}

fn single<'a>(hubs: &'a [HubReport], roles: &[HubRole], exclude: Option<&str>) -> Option<&'a HubReport> {
    let mut matching = hubs
        .iter()
        .filter(|h| roles.contains(&h.role) && Some(h.context.as_str()) != exclude);
    let first = matching.next()?;
    matching.next().is_none().then_some(first)
}

fn count(hubs: &[HubReport], role: HubRole) -> usize {
    hubs.iter().filter(|h| h.role == role).count()
}

/// Pick the highest-confidence (primary, secondary) pair.
///
/// The primary is the only `primary` hub (high) or, when there is none, the
/// only `new-primary` hub (medium). The secondary is the only `secondary` hub
/// (high) or, when there is none, the only `standby`/`old-primary` hub
/// (medium). Anything ambiguous yields no proposal.
pub fn propose_pair(hubs: &[HubReport]) -> Option<PairProposal> {
    let (primary, primary_confidence) = if count(hubs, HubRole::Primary) > 0 {
        (single(hubs, &[HubRole::Primary], None)?, Confidence::High)
    } else {
        (single(hubs, &[HubRole::NewPrimary], None)?, Confidence::Medium)
    };

    let (secondary, secondary_confidence) = if count(hubs, HubRole::Secondary) > 0 {
        (single(hubs, &[HubRole::Secondary], None)?, Confidence::High)
    } else {
        (
            single(
                hubs,
                &[HubRole::Standby, HubRole::OldPrimary],
                Some(primary.context.as_str()),
            )?,
            Confidence::Medium,
        )
    };

    if primary.context == secondary.context {
        return None;
    }
    Some(PairProposal {
        primary: primary.context.clone(),
        secondary: secondary.context.clone(),
        confidence: primary_confidence.min(secondary_confidence),
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn hub(context: &str, role: HubRole) -> HubReport {
        HubReport {
            context: context.to_string(),
            server: format!("https://api.{context}.example.com:6443"),
            role,
            rule: 0,
            rationale: String::new(),
            invalid_configuration: false,
            backup: BackupScheduleState::None,
            restore: RestoreState::None,
            managed_clusters: ManagedClusterCount::default(),
            managed_cluster_names: Vec::new(),
        }
    }

    #[test]
    fn primary_and_secondary_give_high_confidence() {
        let hubs = vec![
            hub("hub-a", HubRole::Primary),
            hub("hub-b", HubRole::Secondary),
            hub("hub-c", HubRole::Standby),
        ];
        assert_eq!(
            propose_pair(&hubs),
            Some(PairProposal {
                primary: "hub-a".to_string(),
                secondary: "hub-b".to_string(),
                confidence: Confidence::High,
            })
        );
    }

    #[test]
    fn fallback_roles_give_medium_confidence() {
        let hubs = vec![hub("hub-a", HubRole::NewPrimary), hub("hub-b", HubRole::OldPrimary)];
        let proposal = propose_pair(&hubs).unwrap();
        assert_eq!(proposal.primary, "hub-a");
        assert_eq!(proposal.secondary, "hub-b");
        assert_eq!(proposal.confidence, Confidence::Medium);

        let hubs = vec![hub("hub-a", HubRole::Primary), hub("hub-b", HubRole::Standby)];
        assert_eq!(propose_pair(&hubs).unwrap().confidence, Confidence::Medium);
    }

    #[test]
    fn ambiguity_yields_no_proposal() {
        let two_primaries = vec![
            hub("hub-a", HubRole::Primary),
            hub("hub-b", HubRole::Primary),
            hub("hub-c", HubRole::Secondary),
        ];
        assert_eq!(propose_pair(&two_primaries), None);

        let two_standbys = vec![
            hub("hub-a", HubRole::Primary),
            hub("hub-b", HubRole::Standby),
            hub("hub-c", HubRole::OldPrimary),
        ];
        assert_eq!(propose_pair(&two_standbys), None);

        let unknown_only = vec![hub("hub-a", HubRole::Unknown), hub("hub-b", HubRole::Unknown)];
        assert_eq!(propose_pair(&unknown_only), None);

        let primary_only = vec![hub("hub-a", HubRole::Primary)];
        assert_eq!(propose_pair(&primary_only), None);
    }

    #[test]
    fn table_mentions_every_hub_and_the_proposal() {
        let report = DiscoveryReport {
            hubs: vec![hub("hub-a", HubRole::Primary), hub("hub-b", HubRole::Secondary)],
            skipped: vec![SkippedContext {
                context: "kind-dev".to_string(),
                reason: SkipReason::NotAFleetHub,
                detail: "namespace open-cluster-management not found".to_string(),
            }],
            proposal: propose_pair(&[hub("hub-a", HubRole::Primary), hub("hub-b", HubRole::Secondary)]),
            verification: None,
        };
        let table = report.render_table();
        assert!(table.contains("hub-a"));
        assert!(table.contains("secondary"));
        assert!(table.contains("not-a-fleet-hub"));
        assert!(table.contains("hub-a -> hub-b"));
    }
}
