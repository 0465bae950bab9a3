use std::collections::HashMap;

use cucumber::{given, then, when, World};
use policy_engine::{CallContext, PolicyId, PolicyStore};

#[derive(World)]
#[world(init = Self::new)]
struct PolicyEngineWorld {
    store: PolicyStore,
    first_policy_id: Option<PolicyId>,
    second_policy_id: Option<PolicyId>,
    last_validate_ok: bool,
    last_decision: Option<String>,
}

impl std::fmt::Debug for PolicyEngineWorld {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyEngineWorld").finish()
    }
}

impl PolicyEngineWorld {
    fn new() -> Self {
        Self {
            store: PolicyStore::new(),
            first_policy_id: None,
            second_policy_id: None,
            last_validate_ok: true,
            last_decision: None,
        }
    }
}

const DENY_ETC: &str = r#"
version: "v1"
rules:
  - name: deny-etc-writes
    action: deny
    tools: ["delete_file"]
    conditions:
      arg_contains: { path: "/etc/" }
    reason: "protected path"
default_action: allow
default_reason: "no matching rule"
"#;

const ALLOW_ALL: &str = r#"
version: "v2"
rules:
  - name: allow-everything
    action: allow
    tools: "*"
default_action: allow
"#;

const EMPTY_RULES: &str = r#"
version: "v1"
rules: []
default_action: deny
"#;

#[given("a policy engine")]
async fn given_policy_engine(_world: &mut PolicyEngineWorld) {}

#[when(regex = r#"^I load a policy with a rule denying "([^"]+)" on "([^"]+)"$"#)]
async fn load_deny_policy(world: &mut PolicyEngineWorld, _tool: String, _path: String) {
    let outcome = world
        .store
        .create(DENY_ETC, "v1", "deny writes under /etc", false)
        .expect("policy should be created");
    world.first_policy_id = Some(outcome.policy_id);
}

#[when("I activate that policy")]
async fn activate_first(world: &mut PolicyEngineWorld) {
    let id = world.first_policy_id.expect("first policy must be loaded");
    world.store.activate(id).expect("activation should succeed");
}

#[when("I load a second policy that allows everything")]
async fn load_second_policy(world: &mut PolicyEngineWorld) {
    let outcome = world
        .store
        .create(ALLOW_ALL, "v2", "allow everything", false)
        .expect("second policy should be created");
    world.second_policy_id = Some(outcome.policy_id);
}

#[when("I activate the second policy")]
async fn activate_second(world: &mut PolicyEngineWorld) {
    let id = world
        .second_policy_id
        .expect("second policy must be loaded");
    world.store.activate(id).expect("activation should succeed");
}

#[when("I load a policy document with no rules")]
async fn load_empty_policy(world: &mut PolicyEngineWorld) {
    let outcome = world.store.validate(EMPTY_RULES, false);
    world.last_validate_ok = outcome.ok;
}

#[when(regex = r#"^evaluating "([^"]+)" against "([^"]+)" yields "([^"]+)"$"#)]
async fn evaluate_and_record(
    world: &mut PolicyEngineWorld,
    tool_name: String,
    path: String,
    expected: String,
) {
    let version = world.store.current().expect("a policy must be active");
    let compiled = world
        .store
        .evaluator
        .compiled(version)
        .expect("policy should compile");
    let call = CallContext {
        tool_name,
        tool_args: serde_json::json!({ "path": path }),
        session_context: HashMap::new(),
        metadata: HashMap::new(),
    };
    let decision = world.store.evaluator.evaluate(&compiled, &call);
    world.last_decision = Some(decision.action.as_str().to_string());
    assert_eq!(world.last_decision.as_deref(), Some(expected.as_str()));
}

#[then("the first policy is no longer active")]
async fn first_no_longer_active(world: &mut PolicyEngineWorld) {
    let first_id = world.first_policy_id.expect("first policy must be loaded");
    let version = world.store.get(&first_id).expect("policy must still exist");
    assert!(!version.active);
    let current = world.store.current().expect("a policy must be active");
    assert_eq!(current.id, world.second_policy_id.unwrap());
}

#[then("the policy fails validation")]
async fn policy_fails_validation(world: &mut PolicyEngineWorld) {
    assert!(!world.last_validate_ok);
}

#[tokio::main]
async fn main() {
    PolicyEngineWorld::run("tests/features").await;
}
