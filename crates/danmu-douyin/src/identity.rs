//! Randomised client identity: desktop user agent and unique user id.

use rand::seq::SliceRandom;
use rand::Rng;

const PLATFORMS: &[&str] = &[
    "(Windows NT 10.0; WOW64)",
    "(Windows NT 10.0; Win64; x64)",
    "(Windows NT 6.3; WOW64)",
    "(Windows NT 6.3; Win64; x64)",
    "(Windows NT 6.1; Win64; x64)",
    "(Windows NT 6.1; WOW64)",
    "(X11; Linux x86_64)",
    "(Macintosh; Intel Mac OS X 10_12_6)",
];

const CHROME_VERSIONS: &[&str] = &[
    "110.0.5481.77",
    "110.0.5481.30",
    "109.0.5414.74",
    "108.0.5359.71",
    "108.0.5359.22",
    "98.0.4758.48",
    "97.0.4692.71",
];

const UNIQUE_ID_RANGE: std::ops::RangeInclusive<u64> = 7_300_000_000_000_000_000..=7_999_999_999_999_999_999;

pub fn random_user_agent() -> String {
    let mut rng = rand::thread_rng();
    let platform = PLATFORMS.choose(&mut rng).copied().unwrap_or(PLATFORMS[0]);
    let chrome = CHROME_VERSIONS
        .choose(&mut rng)
        .copied()
        .unwrap_or(CHROME_VERSIONS[0]);
    format!(
        "Mozilla/5.0 {platform} AppleWebKit/537.36 (KHTML, like Gecko) Chrome/{chrome} Safari/537.36"
    )
}

/// A fresh `user_unique_id`, drawn per connection attempt.
pub fn random_unique_id() -> String {
    rand::thread_rng().gen_range(UNIQUE_ID_RANGE).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_agent_shape() {
        for _ in 0..20 {
            let ua = random_user_agent();
            assert!(ua.starts_with("Mozilla/5.0 ("));
            assert!(ua.contains("Chrome/"));
            assert!(PLATFORMS.iter().any(|p| ua.contains(p)));
        }
    }

    #[test]
    fn unique_id_in_range() {
        for _ in 0..100 {
            let id: u64 = random_unique_id().parse().unwrap();
            assert!(UNIQUE_ID_RANGE.contains(&id));
        }
    }
}
