//! Fixed test identifiers for deterministic tests.

// Issuers
pub const TEST_ISSUER: &str = "https://www.example.com";
pub const TEST_ISSUER_OTHER: &str = "https://other.example.org";

// Audiences
pub const TEST_AUDIENCE: &str = "bookstore";
pub const TEST_AUDIENCE_OTHER: &str = "library";

// Provider names
pub const TEST_PROVIDER: &str = "example";
pub const TEST_JWT_PROVIDER: &str = "main";

// Routes
pub const TEST_ROUTE: &str = "/api";

// Signing Key IDs
pub const TEST_KEY_ID_1: &str = "test-key-2025-01";
pub const TEST_KEY_ID_2: &str = "test-key-2025-02";

// JWKS path served by MockJwksServer
pub const TEST_JWKS_PATH: &str = "/jwks.json";
