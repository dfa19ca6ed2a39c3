use super::*;
use axum::http::HeaderMap;

fn headers_with(value: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert("authorization", value.parse().unwrap());
    headers
}

mod extract_bearer_token_tests {
    use super::*;

    #[test]
    fn valid_bearer_token() {
        let headers = headers_with("Bearer user-42");
        assert_eq!(extract_bearer_token(&headers).unwrap(), "user-42");
    }

    #[test]
    fn valid_bearer_token_with_extra_whitespace() {
        let headers = headers_with("Bearer   user-42  ");
        assert_eq!(extract_bearer_token(&headers).unwrap(), "user-42");
    }

    #[test]
    fn case_insensitive_bearer() {
        let headers = headers_with("bearer user-42");
        assert_eq!(extract_bearer_token(&headers).unwrap(), "user-42");
    }

    #[test]
    fn missing_authorization_header() {
        assert_eq!(extract_bearer_token(&HeaderMap::new()), Err(TokenError::Missing));
    }

    #[test]
    fn wrong_scheme() {
        let headers = headers_with("Basic dXNlcjpwYXNz");
        assert_eq!(extract_bearer_token(&headers), Err(TokenError::InvalidFormat));
    }

    #[test]
    fn no_token_part() {
        let headers = headers_with("Bearer");
        assert_eq!(extract_bearer_token(&headers), Err(TokenError::InvalidFormat));
    }

    #[test]
    fn empty_token() {
        let headers = headers_with("Bearer    ");
        assert_eq!(extract_bearer_token(&headers), Err(TokenError::Empty));
    }
}

mod authenticate_user_tests {
    use super::*;

    fn store_with(user_id: &str) -> (UserTokenStore, String) {
        let store = UserTokenStore::new(":memory:").unwrap();
        let token = store.issue(user_id).unwrap();
        (store, token)
    }

    #[test]
    fn issued_token_resolves_to_user() {
        let (store, token) = store_with("alice@example.com");
        let headers = headers_with(&format!("Bearer {}", token));
        assert_eq!(
            authenticate_user(&headers, true, &store).unwrap(),
            "alice@example.com"
        );
    }

    #[test]
    fn user_id_as_bearer_is_rejected() {
        let (store, _token) = store_with("alice");
        let headers = headers_with("Bearer alice");
        assert!(matches!(
            authenticate_user(&headers, true, &store),
            Err(AuthError::Unrecognized)
        ));
    }

    #[test]
    fn revoked_token_is_rejected() {
        let (store, token) = store_with("alice");
        store.revoke(&token).unwrap();
        let headers = headers_with(&format!("Bearer {}", token));
        assert!(matches!(
            authenticate_user(&headers, true, &store),
            Err(AuthError::Unrecognized)
        ));
    }

    #[test]
    fn disabled_auth_uses_default_user() {
        let (store, token) = store_with("alice");
        assert_eq!(
            authenticate_user(&HeaderMap::new(), false, &store).unwrap(),
            DEFAULT_USER
        );
        let headers = headers_with(&format!("Bearer {}", token));
        assert_eq!(authenticate_user(&headers, false, &store).unwrap(), DEFAULT_USER);
    }

    #[test]
    fn enabled_auth_requires_header() {
        let (store, _token) = store_with("alice");
        assert!(matches!(
            authenticate_user(&HeaderMap::new(), true, &store),
            Err(AuthError::Token(TokenError::Missing))
        ));
    }
}
