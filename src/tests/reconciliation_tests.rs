//! tests/reconciliation_tests.rs
//! Conflictos de número duplicado entre identidades del mismo tenant.

#[cfg(test)]
mod tests {
    use actix_rt::test;

    use crate::errors::DispatchError;
    use crate::models::identity_model::IdentityStatus;
    use crate::models::reconcile_model::{MatchAction, Resolution};
    use crate::services::identity_service::IdentityService;
    use crate::services::phone_service;
    use crate::tests::support::{
        seed_identity, test_services, FakeProvider, IdentitySeed, PHONE, TENANT,
    };

    const OLD: &str = "2025-01-01T00:00:00+00:00";
    const NEW: &str = "2025-01-02T00:00:00+00:00";
    const NEWEST: &str = "2025-01-03T00:00:00+00:00";

    type Snapshot = Vec<(String, String, bool, IdentityStatus, Option<String>)>;

    async fn snapshot(identities: &IdentityService) -> Snapshot {
        identities
            .list(TENANT)
            .await
            .unwrap()
            .into_iter()
            .map(|i| (i.id, i.session_name, i.is_connected, i.status, i.phone_number))
            .collect()
    }

    async fn connected_with_phone(identities: &IdentityService) -> usize {
        identities
            .list(TENANT)
            .await
            .unwrap()
            .iter()
            .filter(|i| i.is_connected)
            .filter(|i| {
                i.phone_number
                    .as_deref()
                    .map(|p| phone_service::matches(p, PHONE))
                    .unwrap_or(false)
            })
            .count()
    }

    #[test]
    async fn connected_remote_match_wins_and_is_imported() {
        let fake = FakeProvider::new();
        let (pool, services) = test_services(fake.clone()).await;
        fake.put_session("tok-old", Some(PHONE), "connected");
        fake.put_session("tok-new", Some("62999991111"), "connected");
        let y = seed_identity(&pool, IdentitySeed::connected("fresh", "tok-new", NEW)).await;

        let report = services.reconciler.reconcile(&y).await.unwrap();

        assert_eq!(report.resolution, Resolution::KeptOldConnected);
        assert!(!report.identity_kept);
        assert!(services.identities.find(&y).await.unwrap().is_none());
        assert_eq!(fake.deleted(), vec!["tok-new"]);

        let kept = services
            .identities
            .find_by_token(TENANT, "tok-old")
            .await
            .unwrap()
            .expect("la sesión vieja debe quedar importada");
        assert!(kept.is_connected);
        assert_eq!(kept.status, IdentityStatus::Connected);
        assert_eq!(kept.phone_number.as_deref(), Some(PHONE));
        assert!(report.actions.contains(&MatchAction::Kept {
            token: "tok-old".to_string(),
            local_id: Some(kept.id.clone()),
            imported: true,
        }));
    }

    #[test]
    async fn connected_local_match_wins_without_import() {
        let fake = FakeProvider::new();
        let (pool, services) = test_services(fake.clone()).await;
        fake.put_session("tok-old", Some(PHONE), "connected");
        fake.put_session("tok-new", Some(PHONE), "connected");
        let x = seed_identity(&pool, IdentitySeed::connected("old", "tok-old", OLD)).await;
        let y = seed_identity(&pool, IdentitySeed::connected("fresh", "tok-new", NEW)).await;

        let report = services.reconciler.reconcile(&y).await.unwrap();

        assert_eq!(report.resolution, Resolution::KeptOldConnected);
        assert!(services.identities.find(&y).await.unwrap().is_none());
        assert!(services.identities.find(&x).await.unwrap().is_some());
        assert_eq!(services.identities.list(TENANT).await.unwrap().len(), 1);
    }

    #[test]
    async fn older_identity_wins_when_reconciled_on_demand() {
        let fake = FakeProvider::new();
        let (pool, services) = test_services(fake.clone()).await;
        fake.put_session("tok-old", Some(PHONE), "connected");
        fake.put_session("tok-new", Some(PHONE), "connected");
        let x = seed_identity(&pool, IdentitySeed::connected("old", "tok-old", OLD)).await;
        let y = seed_identity(&pool, IdentitySeed::connected("fresh", "tok-new", NEW)).await;

        let report = services.reconciler.reconcile(&x).await.unwrap();

        assert_eq!(report.resolution, Resolution::KeptOldConnected);
        assert!(report.identity_kept);
        assert!(services.identities.find(&x).await.unwrap().is_some());
        assert!(services.identities.find(&y).await.unwrap().is_none());
        assert_eq!(fake.deleted(), vec!["tok-new"]);
    }

    #[test]
    async fn sessions_of_another_tenant_are_never_imported() {
        let fake = FakeProvider::new();
        let (pool, services) = test_services(fake.clone()).await;
        fake.put_session("tok-a", Some(PHONE), "connected");
        fake.put_session("tok-b", Some(PHONE), "connected");
        let other = seed_identity(
            &pool,
            IdentitySeed {
                tenant_id: "tenant-2",
                ..IdentitySeed::connected("ajena", "tok-b", OLD)
            },
        )
        .await;
        let mine = seed_identity(&pool, IdentitySeed::connected("mia", "tok-a", NEW)).await;

        let report = services.reconciler.reconcile(&mine).await.unwrap();

        assert_eq!(report.resolution, Resolution::NoDuplicates);
        assert!(report.identity_kept);
        assert_eq!(
            report.actions,
            vec![MatchAction::LeftUntouched {
                token: "tok-b".to_string()
            }]
        );
        assert!(fake.deleted().is_empty());

        let own_rows = services.identities.list(TENANT).await.unwrap();
        assert_eq!(own_rows.len(), 1);
        assert_eq!(own_rows[0].id, mine);
        let foreign = services.identities.list("tenant-2").await.unwrap();
        assert_eq!(foreign.len(), 1);
        assert_eq!(foreign[0].id, other);
        assert!(foreign[0].is_connected);
    }

    #[test]
    async fn stale_session_of_another_tenant_is_not_deleted() {
        let fake = FakeProvider::new();
        let (pool, services) = test_services(fake.clone()).await;
        fake.put_session("tok-a", Some(PHONE), "connected");
        fake.put_session("tok-b", Some(PHONE), "disconnected");
        seed_identity(
            &pool,
            IdentitySeed {
                tenant_id: "tenant-2",
                ..IdentitySeed::disconnected("ajena", "tok-b", OLD)
            },
        )
        .await;
        let mine = seed_identity(&pool, IdentitySeed::connected("mia", "tok-a", NEW)).await;

        let report = services.reconciler.reconcile(&mine).await.unwrap();

        assert_eq!(report.resolution, Resolution::NoDuplicates);
        assert!(fake.deleted().is_empty());
        assert_eq!(services.identities.list("tenant-2").await.unwrap().len(), 1);
    }

    #[test]
    async fn stale_match_is_deleted_and_new_identity_kept() {
        let fake = FakeProvider::new();
        let (pool, services) = test_services(fake.clone()).await;
        fake.put_session("tok-old", Some(PHONE), "disconnected");
        fake.put_session("tok-new", Some(PHONE), "connected");
        let x = seed_identity(&pool, IdentitySeed::disconnected("old", "tok-old", OLD)).await;
        let y = seed_identity(&pool, IdentitySeed::connected("fresh", "tok-new", NEW)).await;

        let report = services.reconciler.reconcile(&y).await.unwrap();

        assert_eq!(report.resolution, Resolution::KeptNewDeletedOld);
        assert!(report.identity_kept);
        assert!(services.identities.find(&x).await.unwrap().is_none());
        assert!(services.identities.find(&y).await.unwrap().is_some());
        assert_eq!(fake.deleted(), vec!["tok-old"]);
    }

    #[test]
    async fn local_match_missing_remotely_is_classified_by_status() {
        let fake = FakeProvider::new();
        let (pool, services) = test_services(fake.clone()).await;
        // tok-old no figura en el proveedor: get_status responde Gone
        fake.put_session("tok-new", Some(PHONE), "connected");
        let x = seed_identity(&pool, IdentitySeed::connected("old", "tok-old", OLD)).await;
        let y = seed_identity(&pool, IdentitySeed::connected("fresh", "tok-new", NEW)).await;

        let report = services.reconciler.reconcile(&y).await.unwrap();

        assert_eq!(report.resolution, Resolution::KeptNewDeletedOld);
        assert!(services.identities.find(&x).await.unwrap().is_none());
        assert!(report.actions.contains(&MatchAction::Deleted {
            token: "tok-old".to_string(),
            local_id: Some(x),
            remote_deleted: true,
        }));
    }

    #[test]
    async fn running_twice_converges_to_the_same_state() {
        let fake = FakeProvider::new();
        let (pool, services) = test_services(fake.clone()).await;
        fake.put_session("tok-old", Some(PHONE), "disconnected");
        fake.put_session("tok-new", Some(PHONE), "connected");
        seed_identity(&pool, IdentitySeed::disconnected("old", "tok-old", OLD)).await;
        let y = seed_identity(&pool, IdentitySeed::connected("fresh", "tok-new", NEW)).await;

        services.reconciler.reconcile(&y).await.unwrap();
        let after_first = snapshot(&services.identities).await;
        let deleted_first = fake.deleted();

        let second = services.reconciler.reconcile(&y).await.unwrap();

        assert_eq!(second.resolution, Resolution::NoDuplicates);
        assert!(second.actions.is_empty());
        assert_eq!(snapshot(&services.identities).await, after_first);
        assert_eq!(fake.deleted(), deleted_first);
    }

    #[test]
    async fn concurrent_runs_for_the_same_phone_are_serialized() {
        let fake = FakeProvider::new();
        let (pool, services) = test_services(fake.clone()).await;
        fake.put_session("tok-old", Some(PHONE), "disconnected");
        fake.put_session("tok-new", Some(PHONE), "connected");
        seed_identity(&pool, IdentitySeed::disconnected("old", "tok-old", OLD)).await;
        let y = seed_identity(&pool, IdentitySeed::connected("fresh", "tok-new", NEW)).await;

        let (a, b) = tokio::join!(
            services.reconciler.reconcile(&y),
            services.reconciler.reconcile(&y)
        );
        let mut resolutions = vec![a.unwrap().resolution, b.unwrap().resolution];
        resolutions.sort_by_key(|r| format!("{r:?}"));

        assert_eq!(
            resolutions,
            vec![Resolution::KeptNewDeletedOld, Resolution::NoDuplicates]
        );
        assert_eq!(fake.deleted(), vec!["tok-old"]);
    }

    #[test]
    async fn at_most_one_connected_identity_per_phone() {
        let fake = FakeProvider::new();
        let (pool, services) = test_services(fake.clone()).await;
        fake.put_session("tok-a", Some(PHONE), "connected");
        fake.put_session("tok-b", Some("556299991111"), "connected");
        fake.put_session("tok-c", Some("62999991111"), "connected");
        let a = seed_identity(&pool, IdentitySeed::connected("a", "tok-a", OLD)).await;
        seed_identity(&pool, IdentitySeed::connected("b", "tok-b", NEW)).await;
        let c = seed_identity(&pool, IdentitySeed::connected("c", "tok-c", NEWEST)).await;

        assert_eq!(connected_with_phone(&services.identities).await, 3);
        services.reconciler.reconcile(&c).await.unwrap();

        assert_eq!(connected_with_phone(&services.identities).await, 1);
        let remaining = services.identities.list(TENANT).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, a);
    }

    #[test]
    async fn remote_list_failure_changes_nothing() {
        let fake = FakeProvider::new();
        let (pool, services) = test_services(fake.clone()).await;
        fake.put_session("tok-old", Some(PHONE), "disconnected");
        fake.put_session("tok-new", Some(PHONE), "connected");
        seed_identity(&pool, IdentitySeed::disconnected("old", "tok-old", OLD)).await;
        let y = seed_identity(&pool, IdentitySeed::connected("fresh", "tok-new", NEW)).await;
        let before = snapshot(&services.identities).await;

        fake.set_list_fails(true);
        let err = services.reconciler.reconcile(&y).await.unwrap_err();

        assert!(matches!(err, DispatchError::RemoteUnavailable(_)));
        assert_eq!(snapshot(&services.identities).await, before);
        assert!(fake.deleted().is_empty());
    }

    #[test]
    async fn identity_without_phone_has_nothing_to_reconcile() {
        let fake = FakeProvider::new();
        let (pool, services) = test_services(fake.clone()).await;
        let y = seed_identity(
            &pool,
            IdentitySeed {
                phone: None,
                ..IdentitySeed::disconnected("fresh", "tok-new", NEW)
            },
        )
        .await;

        let report = services.reconciler.reconcile(&y).await.unwrap();
        assert_eq!(report.resolution, Resolution::NoDuplicates);
        assert!(report.identity_kept);
    }
}
