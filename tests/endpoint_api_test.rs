mod common;

use axum::http::StatusCode;
use common::{group_payload, user_payload, TestApp};
use serde_json::json;

#[tokio::test]
async fn test_endpoint_admin_crud() {
    let app = TestApp::spawn().await;

    let (status, _, created) = app
        .post(
            "/scim/admin/endpoints",
            &json!({
                "name": "contoso-prod",
                "displayName": "Contoso Production",
                "config": {"VerbosePatchSupported": true}
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let id = created["id"].as_str().unwrap().to_string();
    assert_eq!(created["name"], "contoso-prod");
    assert_eq!(created["config"]["VerbosePatchSupported"], true);
    assert_eq!(created["active"], true);

    // Duplicate name: 409
    let (status, _, _) = app
        .post("/scim/admin/endpoints", &json!({"name": "contoso-prod"}))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    // Name must be URL-safe
    let (status, _, _) = app
        .post("/scim/admin/endpoints", &json!({"name": "has space"}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Lookup by id and by name
    let (status, _, by_id) = app.get(&format!("/scim/admin/endpoints/{}", id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(by_id["id"], created["id"]);
    let (status, _, by_name) = app
        .get("/scim/admin/endpoints/by-name/contoso-prod")
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(by_name["id"], created["id"]);

    // Partial update preserves untouched fields, replaces config atomically
    let (status, _, updated) = app
        .patch(
            &format!("/scim/admin/endpoints/{}", id),
            &json!({"description": "EU tenant", "config": {"SomeOtherFlag": "True"}}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["displayName"], "Contoso Production");
    assert_eq!(updated["description"], "EU tenant");
    assert!(updated["config"].get("VerbosePatchSupported").is_none());
    assert_eq!(updated["config"]["SomeOtherFlag"], "True");

    // List includes the default endpoint plus this one
    let (_, _, list) = app.get("/scim/admin/endpoints").await;
    assert_eq!(list.as_array().unwrap().len(), 2);

    let (status, _, _) = app.delete(&format!("/scim/admin/endpoints/{}", id)).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _, _) = app.get(&format!("/scim/admin/endpoints/{}", id)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_unknown_endpoint_is_404() {
    let app = TestApp::spawn().await;
    let (status, _, body) = app.get("/scim/endpoints/no-such-endpoint/Users").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["scimType"], "noTarget");
}

#[tokio::test]
async fn test_endpoint_isolation_reads_and_cascade_delete() {
    let app = TestApp::spawn().await;
    let e1 = app.create_endpoint("iso-one", json!({})).await;
    let e2 = app.create_endpoint("iso-two", json!({})).await;

    let (_, _, u1) = app
        .post(
            &format!("/scim/endpoints/{}/Users", e1),
            &user_payload("only-in-one@x.com"),
        )
        .await;
    app.post(
        &format!("/scim/endpoints/{}/Users", e2),
        &user_payload("only-in-two@x.com"),
    )
    .await;
    app.post(
        &format!("/scim/endpoints/{}/Groups", e1),
        &group_payload("One Group", json!([{"value": u1["id"]}])),
    )
    .await;

    // Reads under e2 never see e1 rows
    let (_, _, listing) = app.get(&format!("/scim/endpoints/{}/Users", e2)).await;
    assert_eq!(listing["totalResults"], 1);
    assert_eq!(listing["Resources"][0]["userName"], "only-in-two@x.com");
    let (status, _, _) = app
        .get(&format!(
            "/scim/endpoints/{}/Users/{}",
            e2,
            u1["id"].as_str().unwrap()
        ))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Stats reflect ownership
    let (_, _, stats) = app
        .get(&format!("/scim/admin/endpoints/{}/stats", e1))
        .await;
    assert_eq!(stats["users"], 1);
    assert_eq!(stats["groups"], 1);

    // Cascade: deleting e1 removes its resources and leaves e2 intact
    let (status, _, _) = app.delete(&format!("/scim/admin/endpoints/{}", e1)).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _, _) = app.get(&format!("/scim/endpoints/{}/Users", e1)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (_, _, listing) = app.get(&format!("/scim/endpoints/{}/Users", e2)).await;
    assert_eq!(listing["totalResults"], 1);
}

#[tokio::test]
async fn test_discovery_documents() {
    let app = TestApp::spawn().await;

    let (status, _, spc) = app.get("/scim/v2/ServiceProviderConfig").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(spc["patch"]["supported"], true);
    assert_eq!(spc["bulk"]["supported"], false);
    assert_eq!(spc["etag"]["supported"], true);
    assert_eq!(spc["sort"]["supported"], false);
    assert_eq!(spc["changePassword"]["supported"], false);
    assert_eq!(
        spc["authenticationSchemes"][0]["type"],
        "oauthbearertoken"
    );

    let (status, _, schemas) = app.get("/scim/v2/Schemas").await;
    assert_eq!(status, StatusCode::OK);
    let ids: Vec<&str> = schemas["Resources"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["id"].as_str().unwrap())
        .collect();
    assert!(ids.contains(&"urn:ietf:params:scim:schemas:core:2.0:User"));
    assert!(ids.contains(&"urn:ietf:params:scim:schemas:core:2.0:Group"));
    assert!(ids.contains(&"urn:ietf:params:scim:schemas:extension:enterprise:2.0:User"));

    let (status, _, types) = app.get("/scim/v2/ResourceTypes").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(types["totalResults"], 2);
}

#[tokio::test]
async fn test_version_endpoint_masks_storage_url() {
    let app = TestApp::spawn().await;
    let (status, _, body) = app.get("/scim/admin/version").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "scimgate");
    assert_eq!(body["storage"]["kind"], "sqlite");
    assert_eq!(body["auth"]["sharedSecretConfigured"], true);
    assert_eq!(body["auth"]["jwtConfigured"], false);
}
