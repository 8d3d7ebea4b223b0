//! tests/mod.rs
//! Pruebas del núcleo de despacho contra SQLite en memoria y un proveedor falso.

mod support;

mod bootstrap_tests;
mod reconciliation_tests;
