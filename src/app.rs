//! app.rs
use crate::handlers::{
    campaign_handler, identity_handler, queue_handler, restriction_handler, send_handler,
};
use actix_web::web;

pub fn init_app(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .route(
                "/queue/interval",
                web::put().to(queue_handler::set_interval_endpoint),
            )
            .service(
                web::scope("/tenants/{tenant_id}")
                    .service(
                        web::scope("/identities")
                            .route(
                                "",
                                web::post().to(identity_handler::create_identity_endpoint),
                            )
                            .route(
                                "",
                                web::get().to(identity_handler::list_identities_endpoint),
                            )
                            .route(
                                "/{id}",
                                web::get().to(identity_handler::get_identity_endpoint),
                            )
                            .route(
                                "/{id}",
                                web::delete().to(identity_handler::delete_identity_endpoint),
                            )
                            .route(
                                "/{id}/refresh",
                                web::post().to(identity_handler::refresh_identity_endpoint),
                            )
                            .route(
                                "/{id}/pause",
                                web::post().to(identity_handler::pause_identity_endpoint),
                            )
                            .route(
                                "/{id}/resume",
                                web::post().to(identity_handler::resume_identity_endpoint),
                            )
                            .route(
                                "/{id}/reconcile",
                                web::post().to(identity_handler::reconcile_identity_endpoint),
                            )
                            .route(
                                "/{id}/eligibility",
                                web::get().to(send_handler::eligibility_endpoint),
                            ),
                    )
                    .route("/send", web::post().to(send_handler::send_message_endpoint))
                    .route(
                        "/verifications",
                        web::get().to(send_handler::list_verifications_endpoint),
                    )
                    .service(
                        web::scope("/restrictions")
                            .route(
                                "/check",
                                web::post().to(restriction_handler::check_restrictions_endpoint),
                            )
                            .route(
                                "/blocks",
                                web::get().to(restriction_handler::block_counts_endpoint),
                            ),
                    )
                    .service(
                        web::scope("/campaigns/{campaign_id}")
                            .route(
                                "/bindings",
                                web::post().to(campaign_handler::bind_identity_endpoint),
                            )
                            .route(
                                "/bindings",
                                web::get().to(campaign_handler::list_bindings_endpoint),
                            )
                            .route(
                                "/send",
                                web::post().to(campaign_handler::campaign_send_endpoint),
                            )
                            .route(
                                "/provision",
                                web::post().to(campaign_handler::provision_identity_endpoint),
                            ),
                    )
                    .service(
                        web::scope("/queue")
                            .route(
                                "/status",
                                web::get().to(queue_handler::queue_status_endpoint),
                            )
                            .route(
                                "/items",
                                web::get().to(queue_handler::list_queue_items_endpoint),
                            )
                            .route(
                                "/items/{id}",
                                web::get().to(queue_handler::get_queue_item_endpoint),
                            )
                            .route(
                                "/items/{id}/retry",
                                web::post().to(queue_handler::retry_queue_item_endpoint),
                            )
                            .route(
                                "/retry-all",
                                web::post().to(queue_handler::retry_all_endpoint),
                            ),
                    ),
            ),
    );
}
