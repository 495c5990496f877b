use rand::seq::SliceRandom;
use rand::Rng;

const CHROME_VERSIONS: &[&str] = &["120.0.0.0", "121.0.0.0", "122.0.0.0", "123.0.0.0", "124.0.0.0"];

const ACCEPT_LANGUAGE: &[&str] = &["en-US,en;q=0.9", "en-GB,en;q=0.9", "en-IN,en;q=0.9,hi;q=0.8"];

const DESKTOP_PLATFORMS: &[(&str, &str)] = &[
    ("Windows NT 10.0; Win64; x64", "\"Windows\""),
    ("Macintosh; Intel Mac OS X 10_15_7", "\"macOS\""),
    ("X11; Linux x86_64", "\"Linux\""),
];

const MOBILE_DEVICES: &[&str] = &["Linux; Android 13; SM-G991B", "Linux; Android 14; Pixel 8", "Linux; Android 12; M2102J20SG"];

/// Client identity for one request: a user agent plus the headers a real browser of
/// that kind would send alongside it.
#[derive(Debug, Clone)]
pub struct Identity {
    pub user_agent: String,
    pub headers: Vec<(String, String)>,
}

impl Identity {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.iter().find(|(k, _)| k.eq_ignore_ascii_case(name)).map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct IdentityRotator {
    /// Share of identities drawn from the mobile profile.
    pub mobile_ratio: f64,
}

impl Default for IdentityRotator {
    fn default() -> Self { IdentityRotator { mobile_ratio: 0.25 } }
}

impl IdentityRotator {
    pub fn next(&self) -> Identity {
        let mut rng = rand::thread_rng();
        if rng.gen_bool(self.mobile_ratio.clamp(0.0, 1.0)) { mobile(&mut rng) } else { desktop(&mut rng) }
    }
}

fn pick<'a, R: Rng>(rng: &mut R, items: &[&'a str]) -> &'a str {
    items.choose(rng).copied().unwrap_or_default()
}

fn desktop<R: Rng>(rng: &mut R) -> Identity {
    let version = pick(rng, CHROME_VERSIONS);
    let major = version.split('.').next().unwrap_or(version);
    let (os, platform) = DESKTOP_PLATFORMS.choose(rng).copied().unwrap_or(DESKTOP_PLATFORMS[0]);
    let user_agent = format!("Mozilla/5.0 ({os}) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/{version} Safari/537.36");
    let headers = vec![
        ("Accept".into(), "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8".into()),
        ("Accept-Language".into(), pick(rng, ACCEPT_LANGUAGE).into()),
        ("Upgrade-Insecure-Requests".into(), "1".into()),
        ("Sec-Ch-Ua".into(), format!("\"Chromium\";v=\"{major}\", \"Google Chrome\";v=\"{major}\"")),
        ("Sec-Ch-Ua-Mobile".into(), "?0".into()),
        ("Sec-Ch-Ua-Platform".into(), platform.into()),
        ("Sec-Fetch-Dest".into(), "document".into()),
        ("Sec-Fetch-Mode".into(), "navigate".into()),
        ("Sec-Fetch-Site".into(), "none".into()),
        ("Sec-Fetch-User".into(), "?1".into()),
    ];
    Identity { user_agent, headers }
}

fn mobile<R: Rng>(rng: &mut R) -> Identity {
    let version = pick(rng, CHROME_VERSIONS);
    let device = pick(rng, MOBILE_DEVICES);
    let user_agent = format!("Mozilla/5.0 ({device}) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/{version} Mobile Safari/537.36");
    let headers = vec![
        ("Accept".into(), "application/json, text/plain, */*".into()),
        ("Accept-Language".into(), pick(rng, ACCEPT_LANGUAGE).into()),
        ("Sec-Ch-Ua-Mobile".into(), "?1".into()),
    ];
    Identity { user_agent, headers }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn desktop_profile_is_consistent() {
        let id = IdentityRotator { mobile_ratio: 0.0 }.next();
        assert!(id.user_agent.contains("Chrome/"));
        assert!(!id.user_agent.contains("Mobile"));
        assert_eq!(id.header("sec-ch-ua-mobile"), Some("?0"));
        let major = id.user_agent.split("Chrome/").nth(1).unwrap().split('.').next().unwrap();
        assert!(id.header("Sec-Ch-Ua").unwrap().contains(&format!("v=\"{major}\"")));
    }

    #[test]
    fn mobile_profile_is_consistent() {
        let id = IdentityRotator { mobile_ratio: 1.0 }.next();
        assert!(id.user_agent.contains("Mobile Safari"));
        assert_eq!(id.header("Sec-Ch-Ua-Mobile"), Some("?1"));
    }
}
