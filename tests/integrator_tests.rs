//! # Integrator Integration Tests
//!
//! Tests of the config-driven provider application against a requirer on
//! the in-memory model.
//!
//! These tests verify:
//! - Configuration republishing across every live relation
//! - Blocked status on missing parameters and unresolvable credentials
//! - Secret rotation re-validation on the provider side
//! - Leader gating of configuration publishing
//! - The connection-info and config-validation operator surfaces

mod common;

use common::*;
use object_storage_integrator::integrator::UnitStatus;
use object_storage_integrator::model::{RelationId, SecretUri};

/// Full provisioning: join, configure with a resolvable secret, settle.
async fn provisioned() -> (IntegratorBed, RelationId, SecretUri) {
    let mut bed = IntegratorBed::new(base_config());
    let relation = bed.join();
    bed.settle().await;

    let uri = bed.model.add_user_secret(secret_content(&[("secret-key", "k1")]));
    bed.model.grant_app(&uri, PROVIDER_APP);
    let mut config = base_config();
    config.credentials = Some(uri.to_string());
    bed.integrator
        .on_config_changed(config)
        .await
        .expect("apply full configuration");

    let emitted = bed.settle().await;
    assert_eq!(kinds(&emitted), vec!["credentials-changed"]);
    assert_eq!(bed.integrator.status(), UnitStatus::Active);
    (bed, relation, uri)
}

#[tokio::test]
async fn test_request_without_credentials_blocks_unit() {
    let mut bed = IntegratorBed::new(base_config());
    bed.join();

    // The requirer's container claim arrives, but the integrator has no
    // credentials configured yet
    let emitted = bed.settle().await;
    assert_eq!(kinds(&emitted), vec!["credentials-requested"]);
    assert_eq!(
        bed.integrator.status(),
        UnitStatus::Blocked("Missing parameters: [\"credentials\"]".to_string())
    );
}

#[tokio::test]
async fn test_full_configuration_completes_requirer() {
    let (bed, relation, _uri) = provisioned().await;

    let info = bed
        .requirer
        .connection_info(relation)
        .await
        .expect("read connection info");
    // The configured container wins over the name the requirer claimed
    assert_eq!(info.get("container").map(String::as_str), Some("etl-data"));
    assert_eq!(info.get("storage-account").map(String::as_str), Some("teststorage"));
    assert_eq!(info.get("path").map(String::as_str), Some("/spark-events"));
    assert_eq!(info.get("secret-key").map(String::as_str), Some("k1"));
    assert_eq!(info.get("connection-protocol").map(String::as_str), Some("abfss"));
}

#[tokio::test]
async fn test_configuration_republishes_to_every_relation() {
    let mut bed = IntegratorBed::new(base_config());
    let first = bed.join();
    let second = bed.join();
    bed.settle().await;

    let uri = bed.model.add_user_secret(secret_content(&[("secret-key", "k1")]));
    bed.model.grant_app(&uri, PROVIDER_APP);
    let mut config = base_config();
    config.credentials = Some(uri.to_string());
    bed.integrator
        .on_config_changed(config)
        .await
        .expect("apply full configuration");

    let emitted = bed.settle().await;
    assert_eq!(kinds(&emitted), vec!["credentials-changed", "credentials-changed"]);
    let mut relations: Vec<_> = emitted.iter().map(|event| event.relation()).collect();
    relations.sort_unstable();
    assert_eq!(relations, vec![first, second]);
}

#[tokio::test]
async fn test_valid_rotation_keeps_unit_active() {
    let (mut bed, relation, uri) = provisioned().await;

    bed.model
        .rotate_secret(&uri, secret_content(&[("secret-key", "k2")]));

    let emitted = bed.settle().await;
    assert_eq!(kinds(&emitted), vec!["credentials-changed"]);
    assert_eq!(bed.integrator.status(), UnitStatus::Active);

    let info = bed
        .requirer
        .connection_info(relation)
        .await
        .expect("read connection info");
    assert_eq!(info.get("secret-key").map(String::as_str), Some("k2"));
}

#[tokio::test]
async fn test_rotation_dropping_the_key_field_blocks_unit() {
    let (mut bed, _relation, uri) = provisioned().await;

    bed.model
        .rotate_secret(&uri, secret_content(&[("username", "not-a-key")]));

    let emitted = bed.settle().await;
    assert!(
        emitted.is_empty(),
        "an unusable secret must not complete credentials: {emitted:?}"
    );
    let status = bed.integrator.status();
    assert_eq!(status.as_str(), "blocked");
    assert!(
        status
            .message()
            .is_some_and(|message| message.contains("The field 'secret-key' was not found")),
        "unexpected status: {status:?}"
    );
}

#[tokio::test]
async fn test_dangling_credentials_reference_is_withheld() {
    let mut bed = IntegratorBed::new(base_config());
    let relation = bed.join();
    bed.settle().await;

    let mut config = base_config();
    config.credentials = Some("secret:nowhere".to_string());
    bed.integrator
        .on_config_changed(config)
        .await
        .expect("store configuration with a dangling reference");

    let emitted = bed.settle().await;
    assert!(
        emitted.is_empty(),
        "withheld credentials must not complete the requirer: {emitted:?}"
    );
    let bag = bed.model.app_bag(relation, PROVIDER_APP);
    assert!(
        !bag.contains_key("secret-key-ref"),
        "a dangling reference must not be published: {bag:?}"
    );
    assert_eq!(bag.get("container").map(String::as_str), Some("etl-data"));

    let status = bed.integrator.status();
    assert_eq!(status.as_str(), "blocked");
    assert!(
        status
            .message()
            .is_some_and(|message| message.contains("Failed to resolve secret")),
        "unexpected status: {status:?}"
    );
}

#[tokio::test]
async fn test_invalid_configuration_is_rejected() {
    let bed = IntegratorBed::new(base_config());

    let mut config = base_config();
    config.container = Some("Bad_Container".to_string());
    let result = bed.integrator.on_config_changed(config).await;
    assert!(result.is_err());

    let status = bed.integrator.status();
    assert_eq!(status.as_str(), "blocked");
    assert!(
        status
            .message()
            .is_some_and(|message| message.contains("container")),
        "unexpected status: {status:?}"
    );
}

#[tokio::test]
async fn test_follower_stores_configuration_without_publishing() {
    let mut bed = IntegratorBed::new(base_config());
    bed.model.set_leader(PROVIDER_APP, false);
    let relation = bed.join();
    bed.settle().await;

    let uri = bed.model.add_user_secret(secret_content(&[("secret-key", "k1")]));
    bed.model.grant_app(&uri, PROVIDER_APP);
    let mut config = base_config();
    config.credentials = Some(uri.to_string());
    bed.integrator
        .on_config_changed(config.clone())
        .await
        .expect("store configuration as follower");

    assert!(bed.settle().await.is_empty());
    assert!(bed.model.app_bag(relation, PROVIDER_APP).is_empty());
    assert_eq!(bed.integrator.current_config().credentials, config.credentials);
    // Followers keep their startup status; the leader owns the verdict
    assert_eq!(bed.integrator.status(), UnitStatus::Maintenance);
}

#[tokio::test]
async fn test_connection_info_requires_configuration() {
    let bed = IntegratorBed::new(base_config());
    let info = bed
        .integrator
        .connection_info()
        .expect("options beyond the default are configured");
    assert_eq!(info.get("storage-account").map(String::as_str), Some("teststorage"));
    assert!(!info.contains_key("credentials"));

    let unconfigured = IntegratorBed::new(Default::default());
    let err = unconfigured
        .integrator
        .connection_info()
        .expect_err("only the default protocol is set");
    assert_eq!(err.to_string(), "Credentials are not set!");
}
