//! Integration tests for the sync client against an in-process server.

use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use syncline_client::{
    ClientConfig, ClientError, HttpReply, HttpTransport, LoopbackClient, LoopbackServer,
    RetryConfig, SyncClient,
};
use syncline_protocol::{Actor, PatchOperation, PullRequest, PullResponse, WorkspaceScope};
use syncline_server::{
    EntitySource, MemoryEntityStore, MutationError, MutationRegistry, RequestContext,
    ServerConfig, SyncServer,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Routes loopback requests to a server on behalf of one actor.
struct ActorEndpoint {
    server: Arc<SyncServer>,
    actor: Actor,
}

impl LoopbackServer for ActorEndpoint {
    fn handle_post(&self, path: &str, body: &[u8]) -> HttpReply {
        let ctx = RequestContext::new(self.actor.clone());
        let response = self.server.handle_http(&ctx, path, body);
        HttpReply {
            status: response.status,
            location: response.header("location").map(str::to_string),
            body: response.body,
        }
    }
}

type Client = SyncClient<HttpTransport<LoopbackClient<ActorEndpoint>>>;

#[derive(Deserialize)]
struct StagePut {
    id: String,
    name: String,
}

#[derive(Deserialize)]
struct StageRemove {
    id: String,
}

struct Fixture {
    server: Arc<SyncServer>,
    entities: Arc<MemoryEntityStore>,
    noop_calls: Arc<AtomicUsize>,
}

impl Fixture {
    fn new() -> Self {
        init_tracing();
        let entities = Arc::new(MemoryEntityStore::new(["workspace", "user", "stage"]));
        let noop_calls = Arc::new(AtomicUsize::new(0));

        let mut registry = MutationRegistry::new();
        let calls = Arc::clone(&noop_calls);
        registry.expose("noop", move |_ctx, _args| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let store = Arc::clone(&entities);
        registry.register("stage_put", move |ctx, input: StagePut| {
            let workspace_id = ctx
                .actor()
                .workspace_id()
                .ok_or_else(|| MutationError::Visible("workspace required".into()))?;
            store.put(
                "stage",
                workspace_id,
                &input.id,
                json!({"id": input.id.clone(), "name": input.name, "workspaceID": workspace_id}),
            );
            Ok(())
        });

        let store = Arc::clone(&entities);
        registry.register("stage_remove", move |_ctx, input: StageRemove| {
            store
                .remove("stage", &input.id)
                .map(|_| ())
                .ok_or_else(|| MutationError::Visible(format!("no stage {}", input.id)))
        });

        let server = Arc::new(SyncServer::new(
            ServerConfig::default(),
            registry,
            Arc::clone(&entities) as Arc<dyn EntitySource>,
        ));
        Self {
            server,
            entities,
            noop_calls,
        }
    }

    fn client(&self, group: &str, id: &str, actor: Actor) -> Client {
        let endpoint = ActorEndpoint {
            server: Arc::clone(&self.server),
            actor,
        };
        let transport = HttpTransport::new("memory://sync", LoopbackClient::new(endpoint));
        SyncClient::new(
            ClientConfig::new(group, id).with_retry(RetryConfig::no_retry()),
            transport,
        )
    }

    fn post(&self, actor: Actor, path: &str, body: Value) -> (u16, Value) {
        let ctx = RequestContext::new(actor);
        let response = self
            .server
            .handle_http(&ctx, path, body.to_string().as_bytes());
        let body = if response.body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&response.body).unwrap()
        };
        (response.status, body)
    }

    fn mutation_id(&self, client_id: &str) -> u64 {
        self.server
            .store()
            .client(client_id)
            .unwrap()
            .map(|client| client.mutation_id)
            .unwrap_or(0)
    }
}

fn user() -> Actor {
    Actor::user("usr_1", "wrk_1")
}

fn noop_push(id: u64) -> Value {
    json!({
        "clientGroupID": "g1",
        "pushVersion": 1,
        "mutations": [{"id": id, "clientID": "c1", "name": "noop", "args": {}}]
    })
}

#[test]
fn noop_push_on_fresh_group() {
    let fx = Fixture::new();
    let (status, body) = fx.post(user(), "/push", noop_push(1));
    assert_eq!(status, 200);
    assert_eq!(body, json!({}));
    assert_eq!(fx.mutation_id("c1"), 1);
    assert_eq!(fx.noop_calls.load(Ordering::SeqCst), 1);
}

#[test]
fn replayed_push_changes_nothing() {
    let fx = Fixture::new();
    fx.post(user(), "/push", noop_push(1));
    let group = fx.server.store().client_group("g1").unwrap();

    let (status, _) = fx.post(user(), "/push", noop_push(1));

    assert_eq!(status, 200);
    assert_eq!(fx.noop_calls.load(Ordering::SeqCst), 1);
    assert_eq!(fx.mutation_id("c1"), 1);
    assert_eq!(fx.server.store().client_group("g1").unwrap(), group);
}

#[test]
fn gap_aborts_and_keeps_mutation_id() {
    let fx = Fixture::new();
    fx.post(user(), "/push", noop_push(1));

    let (status, body) = fx.post(user(), "/push", noop_push(3));

    assert_eq!(status, 409);
    assert!(body["error"].as_str().unwrap().contains("from the future"));
    assert_eq!(fx.mutation_id("c1"), 1);
}

#[test]
fn public_caller_is_rejected() {
    let fx = Fixture::new();
    let (status, _) = fx.post(Actor::Public, "/push", noop_push(1));
    assert_eq!(status, 401);
    let (status, _) = fx.post(Actor::Public, "/pull", json!({"clientID": "c1"}));
    assert_eq!(status, 401);
    assert_eq!(fx.mutation_id("c1"), 0);
}

#[test]
fn first_pull_then_idle_pull() {
    let fx = Fixture::new();
    fx.entities
        .put("stage", "wrk_1", "stg_1", json!({"id": "stg_1", "name": "dev"}));

    let (status, body) = fx.post(user(), "/pull", json!({"clientID": "c1"}));
    assert_eq!(status, 200);
    let first: PullResponse = serde_json::from_value(body).unwrap();
    assert_eq!(
        first.patch,
        vec![
            PatchOperation::Clear,
            PatchOperation::put("/init", json!(true)),
            PatchOperation::put("/stage/stg_1", json!({"id": "stg_1", "name": "dev"})),
        ]
    );
    assert!(!first.cookie.cvr.is_empty());

    let request = PullRequest::new("c1", Some(&first.cookie));
    let (_, body) = fx.post(user(), "/pull", serde_json::to_value(&request).unwrap());
    let second: PullResponse = serde_json::from_value(body).unwrap();
    assert!(second.patch.is_empty());
    assert_eq!(second.cookie, first.cookie);
}

#[test]
fn client_round_trip_matches_server_state() {
    let fx = Fixture::new();
    fx.entities
        .put("stage", "wrk_1", "seed", json!({"id": "seed", "name": "seeded"}));
    fx.entities
        .put("stage", "wrk_2", "foreign", json!({"id": "foreign"}));

    let client = fx.client("g1", "c1", user());
    let stages = client.watch_scan(&["stage"]);
    client.sync().unwrap();
    assert_eq!(stages.len(), 1);

    for n in 0..6 {
        client.mutate("stage_put", json!({"id": format!("stg_{n}"), "name": format!("v{n}")}));
    }
    client.mutate("stage_put", json!({"id": "stg_2", "name": "renamed"}));
    client.mutate("stage_remove", json!({"id": "stg_4"}));
    client.mutate("stage_remove", json!({"id": "seed"}));
    // Rejected by the handler but still consumes its id.
    client.mutate("stage_remove", json!({"id": "missing"}));

    let summary = client.sync().unwrap();
    assert_eq!(summary.pushed, 10);
    assert_eq!(summary.pull.last_mutation_id, 10);
    assert_eq!(client.pending_count(), 0);

    let scope = WorkspaceScope {
        workspace_id: "wrk_1".into(),
        user_id: Some("usr_1".into()),
    };
    let expected: BTreeMap<String, Value> = fx
        .entities
        .rows("stage", &scope)
        .into_iter()
        .map(|row| (format!("/stage/{}", row.id), row.value))
        .collect();
    let actual: BTreeMap<String, Value> = stages.keys().into_iter().zip(stages.items()).collect();
    assert_eq!(actual, expected);
    assert_eq!(actual.len(), 5);
    assert_eq!(actual["/stage/stg_2"]["name"], "renamed");

    let sorted = stages.refine(|items: &[Value]| {
        let mut ids: Vec<String> = items
            .iter()
            .filter_map(|item| item["id"].as_str().map(str::to_string))
            .collect();
        ids.sort();
        ids
    });
    assert_eq!(*sorted.get(), vec!["stg_0", "stg_1", "stg_2", "stg_3", "stg_5"]);
}

#[test]
fn poke_brings_second_client_up_to_date() {
    let fx = Fixture::new();
    let mut pokes = fx.server.subscribe_pokes();

    let writer = fx.client("g1", "c1", user());
    let reader = fx.client("g2", "c2", Actor::user("usr_2", "wrk_1"));
    let seen = reader.watch_get(&["stage", "stg_1"]);
    reader.sync().unwrap();
    assert_eq!(seen.value(), None);

    writer.mutate("stage_put", json!({"id": "stg_1", "name": "prod"}));
    writer.push().unwrap();

    let poke = pokes.try_recv().unwrap();
    assert_eq!(poke.scope.as_deref(), Some("wrk_1"));
    reader.handle_poke().unwrap();
    assert_eq!(seen.value().unwrap()["name"], "prod");
}

#[test]
fn foreign_group_push_is_unauthorized() {
    let fx = Fixture::new();
    let owner = fx.client("g1", "c1", user());
    owner.mutate("noop", json!({}));
    owner.push().unwrap();

    let intruder = fx.client("g1", "c9", Actor::user("usr_9", "wrk_1"));
    intruder.mutate("noop", json!({}));
    let err = intruder.push().unwrap_err();
    assert!(matches!(err, ClientError::Unauthorized(_)));
    assert_eq!(fx.noop_calls.load(Ordering::SeqCst), 1);
}

#[test]
fn unsupported_push_version_redirects_client() {
    let fx = Fixture::new();
    let endpoint = ActorEndpoint {
        server: Arc::clone(&fx.server),
        actor: user(),
    };
    let client = SyncClient::new(
        ClientConfig::new("g1", "c1").with_push_version(2),
        HttpTransport::new("memory://sync", LoopbackClient::new(endpoint)),
    );
    client.mutate("noop", json!({}));

    let err = client.push().unwrap_err();
    assert!(matches!(err, ClientError::Redirect { location } if location == "/replicache/push"));
    assert_eq!(client.pending_count(), 1);
}

#[test]
fn account_client_follows_membership() {
    let fx = Fixture::new();
    fx.entities.put_workspace("wrk_1", json!({"id": "wrk_1", "slug": "acme"}));
    fx.entities.put_workspace("wrk_2", json!({"id": "wrk_2", "slug": "other"}));
    fx.entities
        .put_user("wrk_1", "usr_1", "a@example.com", json!({"id": "usr_1"}));

    let client = fx.client("g_acc", "c_acc", Actor::account("acc_1", "a@example.com"));
    let workspaces = client.watch_scan(&["workspace"]);
    client.sync().unwrap();
    assert_eq!(workspaces.items(), vec![json!({"id": "wrk_1", "slug": "acme"})]);

    let cursor = client.cookie().unwrap().last_sync;
    assert!(!cursor.is_epoch());

    fx.entities
        .update("workspace", "wrk_1", |value| value["slug"] = json!("acme-inc"));
    let summary = client.pull().unwrap();
    assert_eq!(summary.operations, 1);
    assert_eq!(workspaces.items()[0]["slug"], "acme-inc");
    assert!(client.cookie().unwrap().last_sync > cursor);
}

#[test]
fn deleted_rows_leave_the_view() {
    let fx = Fixture::new();
    for id in ["a", "b", "c"] {
        fx.entities
            .put("stage", "wrk_1", id, json!({"id": id}));
    }
    let client = fx.client("g1", "c1", user());
    let stages = client.watch_scan(&["stage"]);
    client.pull().unwrap();
    assert_eq!(stages.len(), 3);

    fx.entities.remove("stage", "a");
    let summary = client.pull().unwrap();
    assert_eq!(summary.operations, 1);
    assert_eq!(stages.len(), 2);
    assert_eq!(stages.get("/stage/a"), None);
    assert_eq!(client.replica().get("/stage/a"), None);
}
