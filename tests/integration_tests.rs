//! Integration tests for Cape row level security

use rstest::{fixture, rstest};
use serde_json::json;
use std::collections::BTreeSet;
use std::io::Write;

use ::cape::common::config::CapeConfig;
use ::cape::common::{Action, Error, Subject, SubjectContext};
use ::cape::rls::{CreateTarget, InsertStatement, Model, Predicate, Query, Row};
use ::cape::Cape;

fn documents() -> Model {
    Model::new("documents", ["id", "title", "content", "owner_id", "org_id"])
}

#[fixture]
fn cape() -> Cape {
    let mut cape = Cape::default();
    cape.define(documents());
    cape.permission_required("documents", Some("admin"), &[Action::Any], None, &[]);
    cape.permission_required("documents", None, &[Action::Read], None, &["org_id"]);
    cape.permission_required(
        "documents",
        None,
        &[Action::Read, Action::Create, Action::Update],
        Some("owner_id"),
        &[],
    );

    let mut admin = cape.session(Some(Subject::new("admin")), Some(SubjectContext::new()));
    for (id, owner, org) in [(1, "alice", "org1"), (2, "bob", "org1"), (3, "alice", "org2"), (4, "bob", "org2")] {
        admin.add(
            Row::new("documents")
                .with("id", id)
                .with("title", format!("Doc {id}"))
                .with("content", format!("Content {id}"))
                .with("owner_id", owner)
                .with("org_id", org),
        );
    }
    admin.commit().unwrap();
    drop(admin);
    cape
}

fn ctx(org: &str) -> Option<SubjectContext> {
    Some(SubjectContext::new().with("org_id", org))
}

fn titles(rows: &[Row]) -> BTreeSet<String> {
    rows.iter()
        .filter_map(|r| r.values.get("title").and_then(|t| t.as_str()).map(str::to_string))
        .collect()
}

fn visible(cape: &mut Cape, subject: &str, context: Option<SubjectContext>) -> BTreeSet<String> {
    let mut session = cape.session(Some(Subject::new(subject)), context);
    let rows = session.execute(Query::select("documents")).unwrap().rows();
    titles(&rows)
}

fn set(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| (*s).to_string()).collect()
}

#[rstest]
#[case::own_documents("alice", None, &["Doc 1", "Doc 3"])]
#[case::own_and_org1("alice", ctx("org1"), &["Doc 1", "Doc 2", "Doc 3"])]
#[case::own_and_org2("bob", ctx("org2"), &["Doc 2", "Doc 3", "Doc 4"])]
#[case::unknown_subject("carol", None, &[])]
#[case::admin_sees_all("admin", None, &["Doc 1", "Doc 2", "Doc 3", "Doc 4"])]
fn test_read_visibility(
    mut cape: Cape,
    #[case] subject: &str,
    #[case] context: Option<SubjectContext>,
    #[case] expected: &[&str],
) {
    assert_eq!(visible(&mut cape, subject, context), set(expected));
}

#[rstest]
fn test_context_isolation(mut cape: Cape) {
    assert_eq!(visible(&mut cape, "alice", ctx("org1")).len(), 3);
    assert_eq!(visible(&mut cape, "alice", None).len(), 2);
}

#[rstest]
fn test_multi_valued_context(mut cape: Cape) {
    let context = SubjectContext::new().with("org_id", json!(["org1", "org2"]));
    assert_eq!(visible(&mut cape, "carol", Some(context)).len(), 4);
}

#[rstest]
fn test_write_own_document(mut cape: Cape) {
    let mut session = cape.session(Some(Subject::new("alice")), ctx("org1"));
    session
        .modify("documents", 1, |doc| doc.set("content", "Updated content"))
        .unwrap();
    session.commit().unwrap();

    let doc = session.get("documents", 1).unwrap().unwrap();
    assert_eq!(doc.values["content"], json!("Updated content"));
}

#[rstest]
fn test_write_unauthorized_document(mut cape: Cape) {
    let mut doc = {
        let mut session = cape.session(Some(Subject::new("bob")), ctx("org1"));
        session.get("documents", 2).unwrap().unwrap()
    };
    doc.set("content", "Updated content");

    let mut session = cape.session(Some(Subject::new("alice")), ctx("org1"));
    session.add(doc);
    let err = session.commit().unwrap_err();
    assert!(matches!(err, Error::PermissionDenied(_)));
    drop(session);

    let stored = cape.database().find("documents", &json!(2)).unwrap();
    assert_eq!(stored.values["content"], json!("Content 2"));
}

#[rstest]
fn test_change_owner_field(mut cape: Cape) {
    let mut session = cape.session(Some(Subject::new("alice")), ctx("org1"));
    session
        .modify("documents", 1, |doc| doc.set("content", "Updated content"))
        .unwrap();
    session.commit().unwrap();

    // Handing the row to bob is checked against its state before the change
    session
        .modify("documents", 1, |doc| doc.set("owner_id", "bob"))
        .unwrap();
    session.commit().unwrap();

    // Still readable through org1, but no longer alice's to update
    session
        .modify("documents", 1, |doc| doc.set("content", "This should fail"))
        .unwrap();
    assert!(matches!(session.commit().unwrap_err(), Error::PermissionDenied(_)));
    drop(session);

    let stored = cape.database().find("documents", &json!(1)).unwrap();
    assert_eq!(stored.values["owner_id"], json!("bob"));
    assert_eq!(stored.values["content"], json!("Updated content"));
}

#[rstest]
fn test_insert_statement(mut cape: Cape) {
    let mut session = cape.session(Some(Subject::new("alice")), ctx("org1"));
    let insert = Query::insert("documents")
        .value("id", 5)
        .value("title", "New Doc")
        .value("content", "New Content")
        .value("owner_id", "alice")
        .value("org_id", "org1");
    assert_eq!(session.execute(insert).unwrap().count(), 1);

    let rows = session
        .execute(Query::select("documents").filter(Predicate::eq("title", "New Doc")))
        .unwrap()
        .rows();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].values["owner_id"], json!("alice"));
    assert_eq!(rows[0].values["org_id"], json!("org1"));
}

#[rstest]
fn test_insert_statement_permission_denied(mut cape: Cape) {
    let mut session = cape.session(Some(Subject::new("alice")), ctx("org1"));
    let insert = Query::insert("documents")
        .value("id", 5)
        .value("title", "Unauthorized Doc")
        .value("owner_id", "bob")
        .value("org_id", "org1");
    let err = session.execute(insert).unwrap_err();
    assert!(matches!(err, Error::PermissionDenied(_)));
    assert_eq!(err.error_code(), "rls_violation");
    drop(session);

    assert_eq!(cape.database().rows("documents").len(), 4);
}

#[rstest]
fn test_bulk_update_own_documents(mut cape: Cape) {
    let mut session = cape.session(Some(Subject::new("alice")), Some(SubjectContext::new()));
    let update = Query::update("documents")
        .value("content", "Bulk updated")
        .filter(Predicate::eq("owner_id", "alice"));
    assert_eq!(session.execute(update).unwrap().count(), 2);
    session.commit().unwrap();

    let rows = session
        .execute(Query::select("documents").filter(Predicate::eq("content", "Bulk updated")))
        .unwrap()
        .rows();
    assert_eq!(titles(&rows), set(&["Doc 1", "Doc 3"]));
}

#[rstest]
fn test_bulk_update_never_reaches_foreign_rows(mut cape: Cape) {
    let mut session = cape.session(Some(Subject::new("alice")), ctx("org1"));
    let update = Query::update("documents").value("content", "Overwritten");
    assert_eq!(session.execute(update).unwrap().count(), 2);
    drop(session);

    let untouched: Vec<_> = cape
        .database()
        .rows("documents")
        .iter()
        .filter(|r| r.values["owner_id"] == json!("bob"))
        .collect();
    assert!(untouched.iter().all(|r| r.values["content"] != json!("Overwritten")));
}

#[rstest]
fn test_delete_without_policy_removes_nothing(mut cape: Cape) {
    let mut session = cape.session(Some(Subject::new("alice")), ctx("org1"));
    assert_eq!(session.execute(Query::delete("documents")).unwrap().count(), 0);
    drop(session);

    let mut admin = cape.session(Some(Subject::new("admin")), Some(SubjectContext::new()));
    let delete = Query::delete("documents").filter(Predicate::eq("org_id", "org2"));
    assert_eq!(admin.execute(delete).unwrap().count(), 2);
    drop(admin);
    assert_eq!(cape.database().rows("documents").len(), 2);
}

#[rstest]
fn test_can_create_row_and_insert_agree(cape: Cape) {
    let alice = Subject::new("alice");
    let context = SubjectContext::new().with("org_id", "org1");

    for owner in ["alice", "bob"] {
        let row = Row::new("documents")
            .with("id", 9)
            .with("title", "t")
            .with("content", "c")
            .with("owner_id", owner)
            .with("org_id", "org1");
        let insert = InsertStatement::new("documents")
            .value("id", 9)
            .value("title", "t")
            .value("content", "c")
            .value("owner_id", owner)
            .value("org_id", "org1");

        let by_row = cape.rls().can_create(&alice, &context, CreateTarget::Record(&row)).unwrap();
        let by_insert = cape
            .rls()
            .can_create(&alice, &context, CreateTarget::Insert(&insert))
            .unwrap();
        assert_eq!(by_row, by_insert);
        assert_eq!(by_row, owner == "alice");
    }
}

#[rstest]
fn test_rewrite_is_idempotent(mut cape: Cape) {
    let alice = Subject::new("alice");
    let context = SubjectContext::new().with("org_id", "org1");
    let once = cape
        .rls()
        .filter_query(Query::select("documents"), &alice, Action::Read, &context)
        .unwrap();
    let twice = cape
        .rls()
        .filter_query(once.clone(), &alice, Action::Read, &context)
        .unwrap();

    let first = cape.database_mut().execute(&once).unwrap().rows();
    let second = cape.database_mut().execute(&twice).unwrap().rows();
    assert_eq!(first, second);
}

#[rstest]
fn test_unconditional_policy_leaves_query_unchanged() {
    let cape = Cape::default();
    cape.permission_required("notes", None, &[Action::Read], None, &[]);

    let query = Query::select("notes").filter(Predicate::eq("pinned", true));
    let rewritten = cape
        .rls()
        .filter_query(query.clone(), &Subject::new("anyone"), Action::Read, &SubjectContext::new())
        .unwrap();
    assert_eq!(rewritten, query);
}

#[rstest]
fn test_unregistered_resource_fails_open_by_default() {
    let cape = Cape::default();
    let query = Query::select("audit_log");
    let rewritten = cape
        .rls()
        .filter_query(query.clone(), &Subject::new("anyone"), Action::Read, &SubjectContext::new())
        .unwrap();
    assert_eq!(rewritten, query);
}

#[rstest]
fn test_unregistered_resource_denied_when_configured() {
    let mut config = CapeConfig::default();
    config.rls.deny_unregistered = true;
    let mut cape = Cape::new(config);
    cape.database_mut().seed(Row::new("audit_log").with("id", 1));

    let mut session = cape.session(Some(Subject::new("anyone")), Some(SubjectContext::new()));
    assert_eq!(session.execute(Query::select("audit_log")).unwrap().count(), 0);
}

#[rstest]
fn test_action_mismatch_denies(mut cape: Cape) {
    // The only delete-capable policy belongs to admin
    let alice = Subject::new("alice");
    let doc = cape.database().find("documents", &json!(1)).unwrap().clone();
    assert!(cape.rls().can_read(&alice, &SubjectContext::new(), &doc).unwrap());
    assert!(!cape.rls().can_delete(&alice, &SubjectContext::new(), &doc).unwrap());

    let mut session = cape.session(Some(alice), ctx("org1"));
    session.delete("documents", 1).unwrap();
    assert!(matches!(session.commit().unwrap_err(), Error::PermissionDenied(_)));
}

#[rstest]
fn test_role_membership(mut cape: Cape) {
    let auditor = Subject::new("carol").with_roles(["admin"]);
    let mut session = cape.session(Some(auditor), None);
    assert_eq!(session.execute(Query::select("documents")).unwrap().count(), 4);
}

#[rstest]
fn test_misconfigured_owner_field_surfaces(cape: Cape) {
    cape.permission_required("documents", Some("auditor"), &[Action::Read], Some("author_id"), &[]);

    let auditor = Subject::new("dave").with_roles(["auditor"]);
    let doc = cape.database().find("documents", &json!(1)).unwrap().clone();
    let err = cape.rls().can_read(&auditor, &SubjectContext::new(), &doc).unwrap_err();
    assert!(err.is_configuration());

    let err = cape
        .rls()
        .filter_query(Query::select("documents"), &auditor, Action::Read, &SubjectContext::new())
        .unwrap_err();
    assert!(err.is_configuration());
}

#[test]
fn test_context_policy_without_context_is_unrestricted() {
    let mut cape = Cape::default();
    cape.define(Model::new("projects", ["id", "org_id"]));
    cape.permission_required("projects", None, &[Action::Read], None, &["org_id"]);
    for (id, org) in [(1, "org1"), (2, "org2")] {
        cape.database_mut()
            .seed(Row::new("projects").with("id", id).with("org_id", org));
    }

    let mut session = cape.session(Some(Subject::new("alice")), None);
    assert_eq!(session.execute(Query::select("projects")).unwrap().count(), 2);
    drop(session);

    let mut session = cape.session(Some(Subject::new("alice")), ctx("org2"));
    let rows = session.execute(Query::select("projects")).unwrap().rows();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].values["id"], json!(2));
}

#[rstest]
fn test_insert_without_context_rejected(mut cape: Cape) {
    let mut session = cape.session(Some(Subject::new("alice")), None);
    let insert = Query::insert("documents")
        .value("id", 5)
        .value("title", "No context")
        .value("owner_id", "alice")
        .value("org_id", "org1");
    assert!(matches!(session.execute(insert).unwrap_err(), Error::MissingContext(_)));
    drop(session);

    assert_eq!(cape.database().rows("documents").len(), 4);
}

#[test]
fn test_select_without_table_is_rejected() {
    let cape = Cape::default();
    let err = cape
        .rls()
        .filter_query(
            Query::Select(Default::default()),
            &Subject::new("alice"),
            Action::Read,
            &SubjectContext::new(),
        )
        .unwrap_err();
    assert!(matches!(err, Error::UnsupportedQuery(_)));
}

#[test]
fn test_load_manifest_from_file() {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    write!(
        file,
        r#"
[[models]]
name = "documents"
fields = ["id", "title", "content", "owner_id", "org_id"]

[[permissions]]
resource = "documents"
actions = ["read", "update"]
owner_field = "owner_id"
"#
    )
    .unwrap();

    let mut cape = Cape::default();
    cape.load_manifest(file.path()).unwrap();
    for (id, owner) in [(1, "alice"), (2, "bob")] {
        cape.database_mut().seed(
            Row::new("documents")
                .with("id", id)
                .with("title", format!("Doc {id}"))
                .with("owner_id", owner),
        );
    }

    assert_eq!(visible(&mut cape, "alice", None), set(&["Doc 1"]));
}

#[test]
fn test_from_config_file() {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    write!(file, "[rls]\nwildcard_role = \"any\"\ndeny_unregistered = true\n").unwrap();

    let cape = Cape::from_config_file(file.path()).unwrap();
    assert_eq!(cape.config().rls.wildcard_role, "any");
    assert!(cape.rls().config().deny_unregistered);
}
