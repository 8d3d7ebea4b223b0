//! tests/bootstrap_tests.rs
//! Arranque (config, base en disco) y la API HTTP montada como en `main`.

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use actix_web::{http::StatusCode, test, web, App};
    use serde_json::{json, Value};

    use crate::app;
    use crate::bootstrap::{run_migrations, setup_database, AppServices};
    use crate::config::dispatch_config::DispatchConfig;
    use crate::tests::support::{
        seed_identity, seed_restriction_list, test_services, FakeProvider, IdentitySeed, TENANT,
    };

    const CREATED: &str = "2025-01-01T00:00:00+00:00";

    macro_rules! api {
        ($services:expr) => {
            test::init_service(
                App::new()
                    .app_data(web::Data::new($services.identities.clone()))
                    .app_data(web::Data::new($services.reconciler.clone()))
                    .app_data(web::Data::new($services.status_sync.clone()))
                    .app_data(web::Data::new($services.restrictions.clone()))
                    .app_data(web::Data::new($services.bindings.clone()))
                    .app_data(web::Data::new($services.queue.clone()))
                    .app_data(web::Data::new($services.sender.clone()))
                    .configure(app::init_app),
            )
            .await
        };
    }

    #[actix_rt::test]
    async fn config_defaults() {
        let config = DispatchConfig::default();
        assert_eq!(config.bind_port, 5022);
        assert_eq!(config.queue_interval_ms, 3_000);
        assert_eq!(config.provider_timeout(), Duration::from_secs(30));
        assert_eq!(config.status_sweep_interval(), Duration::from_secs(120));
    }

    #[actix_rt::test]
    async fn database_file_is_created_and_migrated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("dispatch.db");
        let url = format!("sqlite:{}", path.display());

        let pool = setup_database(&url).await.unwrap();
        assert!(path.exists());

        // Correr las migraciones otra vez no hace nada
        run_migrations(&pool).await.unwrap();
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM dispatch_queue")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 0);

        let _services: AppServices = AppServices::build(
            pool,
            FakeProvider::new(),
            &DispatchConfig::default(),
        );
    }

    #[actix_rt::test]
    async fn restricted_send_returns_conflict_with_lists() {
        let fake = FakeProvider::new();
        let (pool, services) = test_services(fake.clone()).await;
        let id = seed_identity(&pool, IdentitySeed::connected("ventas", "tok-ventas", CREATED)).await;
        seed_restriction_list(&pool, TENANT, "opt-out", &["5562988887777"], &[]).await;
        let api = api!(services);

        let req = test::TestRequest::post()
            .uri(&format!("/api/tenants/{TENANT}/send"))
            .set_json(json!({
                "instance_id": id,
                "target": "62988887777",
                "message": { "type": "text", "text": "hola" }
            }))
            .to_request();
        let resp = test::call_service(&api, req).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["success"], json!(false));
        assert_eq!(body["kind"], json!("restricted"));
        assert_eq!(body["phone_number"], json!("62988887777"));
        assert_eq!(body["list_names"], json!(["opt-out"]));
    }

    #[actix_rt::test]
    async fn paused_identity_is_locked_over_http() {
        let fake = FakeProvider::new();
        let (pool, services) = test_services(fake.clone()).await;
        let id = seed_identity(&pool, IdentitySeed::connected("ventas", "tok-ventas", CREATED)).await;
        let api = api!(services);

        let pause = test::TestRequest::post()
            .uri(&format!("/api/tenants/{TENANT}/identities/{id}/pause"))
            .to_request();
        assert_eq!(test::call_service(&api, pause).await.status(), StatusCode::OK);

        let send = test::TestRequest::post()
            .uri(&format!("/api/tenants/{TENANT}/send"))
            .set_json(json!({
                "instance_id": id,
                "target": "5562988887777",
                "message": { "type": "text", "text": "hola" }
            }))
            .to_request();
        let resp = test::call_service(&api, send).await;
        assert_eq!(resp.status(), StatusCode::LOCKED);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["kind"], json!("paused"));

        let other_tenant = test::TestRequest::get()
            .uri(&format!("/api/tenants/tenant-2/identities/{id}"))
            .to_request();
        assert_eq!(
            test::call_service(&api, other_tenant).await.status(),
            StatusCode::NOT_FOUND
        );
    }

    #[actix_rt::test]
    async fn queue_interval_and_status_endpoints() {
        let fake = FakeProvider::new();
        let (_pool, services) = test_services(fake.clone()).await;
        let api = api!(services);

        let bad = test::TestRequest::put()
            .uri("/api/queue/interval")
            .set_json(json!({ "interval_ms": 0 }))
            .to_request();
        assert_eq!(test::call_service(&api, bad).await.status(), StatusCode::BAD_REQUEST);

        let ok = test::TestRequest::put()
            .uri("/api/queue/interval")
            .set_json(json!({ "interval_ms": 500 }))
            .to_request();
        assert_eq!(test::call_service(&api, ok).await.status(), StatusCode::OK);
        assert_eq!(services.queue.interval(), Duration::from_millis(500));

        let status = test::TestRequest::get()
            .uri(&format!("/api/tenants/{TENANT}/queue/status"))
            .to_request();
        let body: Value = test::call_and_read_body_json(&api, status).await;
        assert_eq!(body["total"], json!(0));
    }
}
