//! Request routing from parsed envelopes to coordinated executions.
//!
//! The router is the only path from the wire to the coordinator: it resolves
//! the operation, validates the payload, and hands the prepared task to the
//! coordinator. Immediate outcomes (unknown action, bad payload, cache hit,
//! busy rejection) come back as `Some(response)`; everything else is answered
//! later by fan-out.

use std::sync::Arc;

use uuid::Uuid;

use hostbridge_protocol::{ErrorCode, RequestEnvelope, ResponseEnvelope};

use crate::coordination::{Coordinator, Waiter};
use crate::host::operations::OperationRegistry;
use crate::host::HostState;

pub struct RequestRouter {
    /// Registries tried in order; first claim wins.
    registries: Vec<OperationRegistry>,
    coordinator: Arc<Coordinator<HostState>>,
}

impl RequestRouter {
    pub fn new(registry: OperationRegistry, coordinator: Arc<Coordinator<HostState>>) -> Self {
        Self {
            registries: vec![registry],
            coordinator,
        }
    }

    /// Append a registry to the dispatch chain. Earlier registries shadow
    /// later ones for the same qualified action.
    pub fn push_registry(&mut self, registry: OperationRegistry) {
        self.registries.push(registry);
    }

    /// Route one automation request. `None` means the response will arrive
    /// through the connection manager when the execution completes.
    pub async fn dispatch(
        &self,
        connection_id: Uuid,
        envelope: RequestEnvelope,
    ) -> Option<ResponseEnvelope> {
        let qualified = envelope.qualified_action();
        let Some(def) = self
            .registries
            .iter()
            .find_map(|registry| registry.lookup(&qualified))
        else {
            tracing::warn!(action = %qualified, "No operation registered");
            return Some(ResponseEnvelope::error(
                &envelope.request_id,
                ErrorCode::UnknownAction,
                format!("no operation registered for {qualified}"),
            ));
        };

        let prepared = match def.prepare(&envelope.payload) {
            Ok(prepared) => prepared,
            Err(err) => {
                return Some(ResponseEnvelope::error(
                    &envelope.request_id,
                    err.code,
                    err.message,
                ));
            }
        };

        tracing::debug!(
            request_id = %envelope.request_id,
            action = %qualified,
            key = %prepared.key,
            "Dispatching request"
        );
        let spec = def.execution_spec(&prepared);
        self.coordinator
            .execute(
                spec,
                prepared.key,
                prepared.task,
                Waiter {
                    request_id: envelope.request_id,
                    connection_id,
                },
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::connections::ConnectionManager;
    use crate::coordination::OwningExecutor;
    use hostbridge_protocol::ServerMessage;
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn router_with(manager: Arc<ConnectionManager>) -> RequestRouter {
        let coordinator = Arc::new(Coordinator::new(
            OwningExecutor::spawn(HostState::new()),
            manager,
            Duration::from_secs(10),
            Duration::from_secs(30),
        ));
        RequestRouter::new(OperationRegistry::builtin(), coordinator)
    }

    fn request(request_id: &str, action: &str, sub_action: &str, payload: serde_json::Value) -> RequestEnvelope {
        RequestEnvelope {
            request_id: request_id.to_string(),
            action: action.to_string(),
            sub_action: Some(sub_action.to_string()),
            payload,
        }
    }

    #[tokio::test]
    async fn unknown_action_is_rejected_immediately() {
        let router = router_with(Arc::new(ConnectionManager::new()));
        let response = router
            .dispatch(Uuid::new_v4(), request("r1", "asset", "explode", json!({})))
            .await
            .expect("immediate");
        assert_eq!(response.error_code, Some(ErrorCode::UnknownAction));
    }

    #[tokio::test]
    async fn malformed_payload_is_rejected_immediately() {
        let router = router_with(Arc::new(ConnectionManager::new()));
        let response = router
            .dispatch(Uuid::new_v4(), request("r1", "asset", "exists", json!({})))
            .await
            .expect("immediate");
        assert_eq!(response.error_code, Some(ErrorCode::InvalidPayload));
    }

    #[tokio::test]
    async fn dispatch_chain_falls_through_to_later_registries() {
        let manager = Arc::new(ConnectionManager::new());
        let coordinator = Arc::new(Coordinator::new(
            OwningExecutor::spawn(HostState::new()),
            manager,
            Duration::from_secs(10),
            Duration::from_secs(30),
        ));
        let mut router = RequestRouter::new(OperationRegistry::new(), coordinator);
        router.push_registry(OperationRegistry::builtin());

        // Resolved by the second registry, so it fails on payload rather
        // than on lookup.
        let response = router
            .dispatch(Uuid::new_v4(), request("r1", "asset", "exists", json!({})))
            .await
            .expect("immediate");
        assert_eq!(response.error_code, Some(ErrorCode::InvalidPayload));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn valid_request_is_answered_by_fan_out() {
        let manager = Arc::new(ConnectionManager::new());
        let router = router_with(manager.clone());

        let connection_id = Uuid::new_v4();
        let (tx, mut rx) = mpsc::channel(8);
        manager.register(connection_id, "test".to_string(), tx).await;

        let immediate = router
            .dispatch(
                connection_id,
                request("r1", "asset", "exists", json!({"path": "/Game/Foo"})),
            )
            .await;
        assert!(immediate.is_none());

        let frame = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("delivered")
            .expect("open");
        match frame {
            ServerMessage::AutomationResponse { envelope } => {
                assert_eq!(envelope.request_id, "r1");
                assert!(envelope.success);
                assert_eq!(envelope.result.expect("result")["exists"], false);
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}
