use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

/// Cookie names the portal sets on a successful login.
pub const SESSION_COOKIES: [&str; 3] = ["JSESSIONID", "loginId", "password"];

static COOKIE_PAIR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\w+)=(\w+);").expect("valid cookie regex"));

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Form body for the login POST.
    #[must_use]
    pub fn login_form(&self) -> [(&str, &str); 4] {
        [
            ("loginId", self.username.as_str()),
            ("passwd", self.password.as_str()),
            ("auto", "on"),
            ("send", "1"),
        ]
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Cookie set proving an authenticated session.
///
/// Attributes the login response did not provide stay empty; the session is
/// still attempted with whatever was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionToken {
    pub jsessionid: String,
    pub login_id: String,
    pub password: String,
    pub auto: String,
}

impl Default for SessionToken {
    fn default() -> Self {
        Self {
            jsessionid: String::new(),
            login_id: String::new(),
            password: String::new(),
            auto: "1".to_string(),
        }
    }
}

impl SessionToken {
    /// Build a token from the raw `Set-Cookie` header values of a login response.
    pub fn from_set_cookie_headers<'a, I>(values: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut token = SessionToken::default();
        for value in values {
            let known = SESSION_COOKIES
                .iter()
                .any(|name| value.starts_with(&format!("{name}=")));
            if !known {
                continue;
            }
            let Some(caps) = COOKIE_PAIR.captures(value) else {
                continue;
            };
            let v = caps[2].to_string();
            match &caps[1] {
                "JSESSIONID" => token.jsessionid = v,
                "loginId" => token.login_id = v,
                "password" => token.password = v,
                _ => {}
            }
        }
        token
    }

    /// Value for the `Cookie` request header.
    #[must_use]
    pub fn cookie_header(&self) -> String {
        format!(
            "JSESSIONID={}; loginId={}; password={}; auto={}",
            self.jsessionid, self.login_id, self.password, self.auto
        )
    }
}
