//! `test-utils` is used for testing in both `pacer-lib` and `pacer-bin`.
//! This crate does not depend on `pacer-lib` or `pacer-bin`, else we would get dependency cycles.
//! Macros are used instead, so that the importer is responsible for providing the dependencies.

/// Build a `http::HeaderMap` from `name => value` pairs.
///
/// Names may use any casing; values can be anything implementing `ToString`.
#[macro_export]
macro_rules! headers {
    ($($name:expr => $value:expr),* $(,)?) => {{
        #[allow(unused_mut)]
        let mut headers = http::HeaderMap::new();
        $(
            headers.insert(
                http::header::HeaderName::from_bytes($name.as_bytes()).expect("Expected valid header name"),
                http::HeaderValue::from_str(&$value.to_string()).expect("Expected valid header value"),
            );
        )*
        headers
    }};
}

/// Format an `X-RateLimit-Reset` value (fractional Unix seconds) for the
/// instant `$delay` from now
#[macro_export]
macro_rules! reset_in {
    ($delay:expr) => {{
        let at = std::time::SystemTime::now() + $delay;
        let secs = at
            .duration_since(std::time::UNIX_EPOCH)
            .expect("Expected time after the Unix epoch")
            .as_secs_f64();
        format!("{secs:.3}")
    }};
}

/// Create a mock web server, which responds with a predefined status when
/// handling a matching request
#[macro_export]
macro_rules! mock_server {
    ($status:expr $(, $func:tt ($($arg:expr),*))*) => {{
        let mock_server = wiremock::MockServer::start().await;
        let response_template = wiremock::ResponseTemplate::new(http::StatusCode::from($status));
        let template = response_template$(.$func($($arg),*))*;
        wiremock::Mock::given(wiremock::matchers::method("GET")).respond_with(template).mount(&mock_server).await;
        mock_server
    }};
}

/// Create a mock web server which answers the first `$limited` requests with
/// `429 Too Many Requests` and `Retry-After: $retry_after`, and every request
/// after that with `200 OK`
#[macro_export]
macro_rules! rate_limited_mock_server {
    ($limited:expr, $retry_after:expr) => {{
        let mock_server = wiremock::MockServer::start().await;

        let too_many = wiremock::ResponseTemplate::new(http::StatusCode::TOO_MANY_REQUESTS)
            .insert_header("Retry-After", $retry_after);
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .respond_with(too_many)
            .up_to_n_times($limited)
            .with_priority(1)
            .mount(&mock_server)
            .await;

        let ok = wiremock::ResponseTemplate::new(http::StatusCode::OK)
            .insert_header("X-RateLimit-Remaining", "10");
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .respond_with(ok)
            .with_priority(2)
            .mount(&mock_server)
            .await;

        mock_server
    }};
}

/// Gets the "main" binary name (e.g. `pacer`)
#[macro_export]
macro_rules! main_command {
    () => {
        assert_cmd::Command::cargo_bin(env!("CARGO_PKG_NAME")).expect("Couldn't get cargo package name")
    };
}

/// Get the root path of the project.
#[macro_export]
macro_rules! root_path {
    () => {
        std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
            .parent()
            .unwrap()
            .to_path_buf()
    };
}
