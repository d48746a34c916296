//! Edge-case exploration strategies.

use crate::model::{Connection, EdgeCaseExploration, EdgeCaseHint, ExplorationOutcome};

/// Strategy for turning a declared edge-case hint into a finding.
#[async_trait::async_trait]
pub trait EdgeCaseExplorer: Send + Sync {
    async fn explore(&self, hint: &EdgeCaseHint, connection: &Connection) -> EdgeCaseExploration;
}

/// Records each hint as `inconclusive` without sending any traffic.
#[derive(Debug, Default, Clone, Copy)]
pub struct DeferredExplorer;

#[async_trait::async_trait]
impl EdgeCaseExplorer for DeferredExplorer {
    async fn explore(&self, hint: &EdgeCaseHint, _connection: &Connection) -> EdgeCaseExploration {
        EdgeCaseExploration {
            kind: hint.kind.clone(),
            description: hint.description.clone(),
            result: ExplorationOutcome::Inconclusive,
            findings: Some(format!(
                "Edge case \"{}\" identified for future exploration",
                hint.description
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Probability;
    use serde_json::json;

    #[tokio::test]
    async fn test_deferred_explorer_is_inconclusive() {
        let connection: Connection =
            serde_json::from_value(json!({ "id": "c1", "baseUrl": "http://localhost" })).unwrap();
        let hint = EdgeCaseHint {
            kind: "boundary".to_string(),
            description: "Request with invalid query params".to_string(),
            probability: Probability::Medium,
        };

        let found = DeferredExplorer.explore(&hint, &connection).await;
        assert_eq!(found.kind, "boundary");
        assert_eq!(found.result, ExplorationOutcome::Inconclusive);
        assert_eq!(
            found.findings.as_deref(),
            Some("Edge case \"Request with invalid query params\" identified for future exploration")
        );
    }
}
