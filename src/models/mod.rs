//! models/mod.rs
//! Módulo raíz para modelos/estructuras compartidas.

pub mod binding_model;
pub mod credential_model;
pub mod identity_model;
pub mod queue_model;
pub mod reconcile_model;
pub mod restriction_model;
pub mod send_model;
