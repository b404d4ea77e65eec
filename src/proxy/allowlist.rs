// Copyright Istio Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::sync::Mutex;

use regex::Regex;

use crate::error::Error;

fn compile(pattern: &str) -> Result<Regex, Error> {
    Regex::new(pattern)
        .map_err(|e| Error::Config(format!("Unable to compile {pattern} regexp: {e}")))
}

/// is_allowed reports whether `url` contains a match of `pattern`. The match is not anchored;
/// patterns that must cover the whole URL should use `^` and `$`.
pub fn is_allowed(url: &str, pattern: &str) -> Result<bool, Error> {
    Ok(compile(pattern)?.is_match(url))
}

/// Allowlist is [`is_allowed`] with the most recently compiled pattern kept around, so the common
/// case of a fixed configured pattern compiles once.
#[derive(Debug, Default)]
pub struct Allowlist {
    last: Mutex<Option<Regex>>,
}

impl Allowlist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_allowed(&self, url: &str, pattern: &str) -> Result<bool, Error> {
        let mut last = self.last.lock().expect("mutex");
        match last.as_ref() {
            Some(re) if re.as_str() == pattern => Ok(re.is_match(url)),
            _ => {
                let re = compile(pattern)?;
                let allowed = re.is_match(url);
                *last = Some(re);
                Ok(allowed)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use matches::assert_matches;
    use test_case::test_case;

    use super::*;

    #[test_case("https://allowed.example/x", r"^https://allowed\.example", true; "anchored prefix")]
    #[test_case("https://blocked.example/x", r"^https://allowed\.example", false; "anchored mismatch")]
    #[test_case("http://169.254.169.254/latest/meta-data/hostname", "169.254.169.254", true; "substring")]
    #[test_case("https://evil.example/?u=https://allowed.example", r"allowed\.example", true; "unanchored matches anywhere")]
    #[test_case("https://evil.example/?u=https://allowed.example", r"^https://allowed\.example", false; "anchor prevents smuggling")]
    #[test_case("anything", ".*", true; "match all")]
    #[test_case("", "^$", true; "empty url")]
    #[test_case("https://a.example", "^$", false; "match nothing")]
    fn allowlist(url: &str, pattern: &str, expected: bool) {
        assert_eq!(is_allowed(url, pattern).unwrap(), expected);
        assert_eq!(Allowlist::new().is_allowed(url, pattern).unwrap(), expected);
    }

    #[test]
    fn invalid_pattern_is_config_error() {
        for url in ["", "https://allowed.example", "not a url"] {
            assert_matches!(is_allowed(url, "(unclosed"), Err(Error::Config(_)));
        }
        let err = is_allowed("https://x", "(unclosed").unwrap_err();
        assert!(err.to_string().starts_with("Unable to compile (unclosed regexp"), "{err}");
    }

    #[test]
    fn cached_filter_is_pure() {
        let a = Allowlist::new();
        let cases = [
            ("https://allowed.example/1", r"^https://allowed\."),
            ("https://blocked.example/1", r"^https://allowed\."),
            ("https://blocked.example/1", "blocked"),
            ("https://allowed.example/1", "blocked"),
            ("https://allowed.example/1", "(bad"),
        ];
        // Same answers regardless of call order or what was cached before
        for _ in 0..2 {
            for (url, pattern) in cases.iter().rev().chain(cases.iter()) {
                assert_eq!(
                    a.is_allowed(url, pattern).ok(),
                    is_allowed(url, pattern).ok(),
                    "{url} {pattern}"
                );
            }
        }
    }
}
