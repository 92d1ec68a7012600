mod common;

use axum::http::StatusCode;
use common::{group_payload, patch_body, user_payload, TestApp};
use serde_json::json;

#[tokio::test]
async fn test_group_create_resolves_members_and_collapses_duplicates() {
    let app = TestApp::spawn().await;
    let (_, _, user) = app.post("/scim/v2/Users", &user_payload("member@x.com")).await;
    let user_id = user["id"].as_str().unwrap();

    let (status, _, group) = app
        .post(
            "/scim/v2/Groups",
            &group_payload(
                "Engineering",
                json!([
                    {"value": user_id, "display": "Member One"},
                    {"value": user_id},
                    {"value": "not-a-user"}
                ]),
            ),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{:?}", group);

    let members = group["members"].as_array().unwrap();
    assert_eq!(members.len(), 2, "duplicates collapse to one entry");

    let resolved = members
        .iter()
        .find(|m| m["value"] == *user_id)
        .expect("resolved member present");
    assert!(resolved["$ref"]
        .as_str()
        .unwrap()
        .ends_with(&format!("/Users/{}", user_id)));

    // Unresolved value is kept, but carries no $ref
    let unresolved = members
        .iter()
        .find(|m| m["value"] == "not-a-user")
        .expect("unresolved member stored by value");
    assert!(unresolved.get("$ref").is_none());
}

#[tokio::test]
async fn test_group_display_name_uniqueness() {
    let app = TestApp::spawn().await;
    let (status, _, _) = app
        .post("/scim/v2/Groups", &group_payload("Sales", json!([])))
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _, body) = app
        .post("/scim/v2/Groups", &group_payload("SALES", json!([])))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["scimType"], "uniqueness");

    // Different endpoint: fine
    let e2 = app.create_endpoint("group-tenant", json!({})).await;
    let (status, _, _) = app
        .post(
            &format!("/scim/endpoints/{}/Groups", e2),
            &group_payload("Sales", json!([])),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn test_multi_member_add_gate() {
    let app = TestApp::spawn().await;
    let endpoint = app
        .create_endpoint(
            "gated",
            json!({"MultiOpPatchRequestAddMultipleMembersToGroup": false}),
        )
        .await;
    let base = format!("/scim/endpoints/{}", endpoint);

    let (_, _, u1) = app
        .post(&format!("{}/Users", base), &user_payload("m1@x.com"))
        .await;
    let (_, _, u2) = app
        .post(&format!("{}/Users", base), &user_payload("m2@x.com"))
        .await;
    let (_, _, group) = app
        .post(&format!("{}/Groups", base), &group_payload("Gated", json!([])))
        .await;
    let group_path = format!("{}/Groups/{}", base, group["id"].as_str().unwrap());

    // Two members in one add op: rejected
    let (status, _, body) = app
        .patch(
            &group_path,
            &patch_body(json!([{
                "op": "add",
                "path": "members",
                "value": [{"value": u1["id"]}, {"value": u2["id"]}]
            }])),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["scimType"], "invalidValue");

    // Split into two ops: accepted, both members present
    let (status, _, patched) = app
        .patch(
            &group_path,
            &patch_body(json!([
                {"op": "add", "path": "members", "value": [{"value": u1["id"]}]},
                {"op": "add", "path": "members", "value": [{"value": u2["id"]}]}
            ])),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{:?}", patched);
    assert_eq!(patched["members"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_multi_member_add_allowed_when_flag_set() {
    let app = TestApp::spawn().await;
    let endpoint = app
        .create_endpoint(
            "ungated",
            json!({"MultiOpPatchRequestAddMultipleMembersToGroup": "True"}),
        )
        .await;
    let base = format!("/scim/endpoints/{}", endpoint);

    let (_, _, group) = app
        .post(&format!("{}/Groups", base), &group_payload("Open", json!([])))
        .await;
    let group_path = format!("{}/Groups/{}", base, group["id"].as_str().unwrap());

    let (status, _, patched) = app
        .patch(
            &group_path,
            &patch_body(json!([{
                "op": "add",
                "path": "members",
                "value": [{"value": "a"}, {"value": "b"}, {"value": "c"}]
            }])),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(patched["members"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn test_remove_member_by_value_path_is_exact() {
    let app = TestApp::spawn().await;
    let (_, _, group) = app
        .post(
            "/scim/v2/Groups",
            &group_payload("Trimmed", json!([{"value": "u1"}, {"value": "u2"}])),
        )
        .await;
    let path = format!("/scim/v2/Groups/{}", group["id"].as_str().unwrap());

    let (status, _, patched) = app
        .patch(
            &path,
            &patch_body(json!([{
                "op": "remove",
                "path": "members[value eq \"u1\"]"
            }])),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let members = patched["members"].as_array().unwrap();
    assert_eq!(members.len(), 1);
    assert_eq!(members[0]["value"], "u2");
}

#[tokio::test]
async fn test_remove_all_members_gate() {
    let app = TestApp::spawn().await;

    // Default: allowed (flag defaults to true)
    let (_, _, group) = app
        .post(
            "/scim/v2/Groups",
            &group_payload("Emptyable", json!([{"value": "u1"}])),
        )
        .await;
    let path = format!("/scim/v2/Groups/{}", group["id"].as_str().unwrap());
    let (status, _, patched) = app
        .patch(
            &path,
            &patch_body(json!([{"op": "remove", "path": "members"}])),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(patched["members"].as_array().unwrap().len(), 0);

    // Flag off: rejected
    let endpoint = app
        .create_endpoint("no-clear", json!({"PatchOpAllowRemoveAllMembers": "False"}))
        .await;
    let base = format!("/scim/endpoints/{}", endpoint);
    let (_, _, group) = app
        .post(
            &format!("{}/Groups", base),
            &group_payload("Locked", json!([{"value": "u1"}])),
        )
        .await;
    let (status, _, body) = app
        .patch(
            &format!("{}/Groups/{}", base, group["id"].as_str().unwrap()),
            &patch_body(json!([{"op": "remove", "path": "members"}])),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["scimType"], "invalidValue");
}

#[tokio::test]
async fn test_group_put_replaces_membership_set() {
    let app = TestApp::spawn().await;
    let (_, _, group) = app
        .post(
            "/scim/v2/Groups",
            &group_payload("Rotating", json!([{"value": "old-1"}, {"value": "old-2"}])),
        )
        .await;
    let id = group["id"].as_str().unwrap();

    let (status, _, replaced) = app
        .put(
            &format!("/scim/v2/Groups/{}", id),
            &group_payload("Rotating", json!([{"value": "new-1"}])),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let members = replaced["members"].as_array().unwrap();
    assert_eq!(members.len(), 1);
    assert_eq!(members[0]["value"], "new-1");
}

#[tokio::test]
async fn test_group_patch_display_name() {
    let app = TestApp::spawn().await;
    let (_, _, group) = app
        .post("/scim/v2/Groups", &group_payload("Old Name", json!([])))
        .await;
    let id = group["id"].as_str().unwrap();

    let (status, _, patched) = app
        .patch(
            &format!("/scim/v2/Groups/{}", id),
            &patch_body(json!([{"op": "replace", "path": "displayName", "value": "New Name"}])),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(patched["displayName"], "New Name");
    assert_eq!(patched["meta"]["resourceType"], "Group");

    let (_, _, fetched) = app.get(&format!("/scim/v2/Groups/{}", id)).await;
    assert_eq!(fetched["displayName"], "New Name");
}

#[tokio::test]
async fn test_group_missing_schema_rejected() {
    let app = TestApp::spawn().await;
    let (status, _, body) = app
        .post("/scim/v2/Groups", &json!({"displayName": "No Schema"}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["scimType"], "invalidSyntax");
}

#[tokio::test]
async fn test_group_filter_by_display_name() {
    let app = TestApp::spawn().await;
    app.post("/scim/v2/Groups", &group_payload("Alpha", json!([])))
        .await;
    app.post("/scim/v2/Groups", &group_payload("Beta", json!([])))
        .await;

    let (status, _, body) = app
        .get(&format!(
            "/scim/v2/Groups?filter={}",
            common::encode_query("displayName eq \"alpha\"")
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["totalResults"], 1);
    assert_eq!(body["Resources"][0]["displayName"], "Alpha");
}
