pub mod storefront_service;
