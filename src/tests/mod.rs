// Test modules for Tutorchat
// Each module covers the corresponding source module; `support` holds the shared test doubles

mod connection_tests;
mod store_tests;
mod support;
