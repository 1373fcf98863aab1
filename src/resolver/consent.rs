//! Cookie-consent overlays and bot challenges.

use url::Url;

/// Known consent platforms and the selector of their "accept" button.
pub const CONSENT_PROVIDERS: &[(&str, &str)] = &[
    ("OneTrust", "#onetrust-accept-btn-handler"),
    (
        "Cookiebot",
        "#CybotCookiebotDialogBodyLevelButtonLevelOptinAllowAll, #CybotCookiebotDialogBodyButtonAccept",
    ),
    ("CookieHub", ".ch2-allow-all-btn"),
    ("CookieFirst", "[data-cookiefirst-action='accept']"),
    ("Osano", ".osano-cm-accept-all"),
    ("Orejime", ".orejime-Button--save, .orejime-Notice-saveButton"),
    ("Axeptio", "#axeptio_btn_acceptAll"),
    ("Civic UK", "#ccc-recommended-settings, #ccc-notify-accept"),
    ("Usercentrics", "[data-testid='uc-accept-all-button']"),
    ("CookieYes", ".cky-btn-accept"),
    ("SecurePrivacy", ".evSpAcceptBtn"),
    ("Quantcast", ".qc-cmp2-summary-buttons button[mode='primary']"),
    ("Didomi", "#didomi-notice-agree-button"),
    ("TrustArc", "#truste-consent-button, .truste-button2"),
];

/// Button labels accepted by the generic fallback.
pub const GENERIC_ACCEPT_LABELS: &[&str] = &[
    "accept all",
    "accept",
    "agree",
    "i agree",
    "allow all",
    "got it",
    "hyväksy",
    "godkänn",
];

/// Hosts that only exist to collect consent before redirecting.
const CONSENT_HOST_PREFIXES: &[&str] = &["consent.", "guce.", "myprivacy."];

const CLOUDFLARE_MARKERS: &[&str] = &[
    "cf-browser-verification",
    "cf_chl_opt",
    "challenge-platform",
    "<title>Just a moment...</title>",
    "Checking your browser before accessing",
];

/// Number of consent-click rounds before giving up.
pub const CONSENT_ROUNDS: usize = 5;

/// Whether the page body is a Cloudflare interstitial.
pub fn is_cloudflare_challenge(html: &str) -> bool {
    CLOUDFLARE_MARKERS.iter().any(|m| html.contains(m))
}

/// Whether the URL is a browser error page or a consent wall host.
pub fn is_blocked_url(url: &str) -> bool {
    if url.starts_with("chrome-error://") {
        return true;
    }
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_lowercase))
        .is_some_and(|host| CONSENT_HOST_PREFIXES.iter().any(|p| host.starts_with(p)))
}

/// JavaScript that clicks the first matching consent button and returns the
/// provider name it clicked, or an empty string.
pub fn consent_click_script() -> String {
    let providers = CONSENT_PROVIDERS
        .iter()
        .map(|(name, selector)| format!("[{:?}, {:?}]", name, selector))
        .collect::<Vec<_>>()
        .join(", ");
    let labels = GENERIC_ACCEPT_LABELS
        .iter()
        .map(|l| format!("{:?}", l))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        r#"(() => {{
    const providers = [{providers}];
    for (const [name, selector] of providers) {{
        const el = document.querySelector(selector);
        if (el && el.offsetParent !== null) {{ el.click(); return name; }}
    }}
    const labels = [{labels}];
    const buttons = Array.from(document.querySelectorAll('button, a[role="button"], input[type="submit"]'));
    for (const label of labels) {{
        const el = buttons.find(b => (b.innerText || b.value || '').trim().toLowerCase() === label);
        if (el) {{ el.click(); return 'generic'; }}
    }}
    return '';
}})()"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cloudflare_detection() {
        assert!(is_cloudflare_challenge(
            "<html><head><title>Just a moment...</title></head></html>"
        ));
        assert!(!is_cloudflare_challenge("<html><title>News</title></html>"));
    }

    #[test]
    fn test_blocked_urls() {
        assert!(is_blocked_url("chrome-error://chromewebdata/"));
        assert!(is_blocked_url("https://consent.google.com/ml?continue=x"));
        assert!(!is_blocked_url("https://news.example.test/story"));
    }

    #[test]
    fn test_script_lists_every_provider() {
        let script = consent_click_script();
        for (name, _) in CONSENT_PROVIDERS {
            assert!(script.contains(name), "{} missing", name);
        }
        assert!(script.contains("\"accept all\""));
    }
}
