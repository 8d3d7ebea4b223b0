pub mod dispatch_config;
