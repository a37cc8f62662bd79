use regex::Regex;
use std::cmp::Ordering;
use std::sync::OnceLock;

/// A version reduced to something orderable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionKey {
    Semantic(semver::Version),
    Release(Release),
}

/// Dotted numeric release with optional pre-release and post-release markers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Release {
    pub parts: Vec<u64>,
    /// (rank, number): dev=0, alpha=1, beta=2, rc=3
    pub pre: Option<(u8, u64)>,
    pub post: Option<u64>,
}

impl Ord for Release {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.parts.len().max(other.parts.len());
        for idx in 0..len {
            let a = self.parts.get(idx).copied().unwrap_or(0);
            let b = other.parts.get(idx).copied().unwrap_or(0);
            match a.cmp(&b) {
                Ordering::Equal => continue,
                other => return other,
            }
        }

        // A final release outranks any of its pre-releases
        let pre = match (&self.pre, &other.pre) {
            (None, None) => Ordering::Equal,
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (Some(a), Some(b)) => a.cmp(b),
        };
        if pre != Ordering::Equal {
            return pre;
        }

        self.post.cmp(&other.post)
    }
}

impl PartialOrd for Release {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl VersionKey {
    pub fn compare(&self, other: &VersionKey) -> Option<Ordering> {
        match (self, other) {
            // build metadata carries no precedence
            (VersionKey::Semantic(a), VersionKey::Semantic(b)) => {
                Some((a.major, a.minor, a.patch, &a.pre).cmp(&(b.major, b.minor, b.patch, &b.pre)))
            }
            (VersionKey::Release(a), VersionKey::Release(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

/// Strip requirement operators so `^4.18.0`, `==2.31.0` or `>=1.0,<2` yield
/// the concrete version they name. Ranges that name no single version give None.
pub fn strip_requirement(raw: &str) -> Option<&str> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.contains("||") || trimmed.contains(" - ") {
        return None;
    }

    let first = trimmed.split(',').next()?.trim();
    let first = first.split_whitespace().last()?;
    let stripped = first.trim_start_matches(|c: char| matches!(c, '^' | '~' | '=' | '>' | '<' | '!'));
    let stripped = match stripped.strip_prefix('v') {
        Some(rest) if rest.starts_with(|c: char| c.is_ascii_digit()) => rest,
        _ => stripped,
    };

    if stripped.starts_with(|c: char| c.is_ascii_digit()) {
        Some(stripped)
    } else {
        None
    }
}

/// npm-style semver, tolerating missing minor/patch components.
pub fn parse_semver_like(raw: &str) -> Option<VersionKey> {
    let cleaned = strip_requirement(raw)?;
    if let Ok(version) = semver::Version::parse(cleaned) {
        return Some(VersionKey::Semantic(version));
    }

    let (core, rest) = match cleaned.find(|c: char| c == '-' || c == '+') {
        Some(idx) => cleaned.split_at(idx),
        None => (cleaned, ""),
    };
    if !core.split('.').all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit())) {
        return None;
    }
    let mut components: Vec<&str> = core.split('.').collect();
    if components.len() > 3 {
        return None;
    }
    while components.len() < 3 {
        components.push("0");
    }
    semver::Version::parse(&format!("{}{}", components.join("."), rest))
        .ok()
        .map(VersionKey::Semantic)
}

fn pep440_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)^(\d+(?:\.\d+)*)(?:[-_.]?(a|alpha|b|beta|c|rc|pre|preview)[-_.]?(\d*))?(?:[-_.]?(?:post|r|rev)[-_.]?(\d*))?(?:[-_.]?dev[-_.]?(\d*))?(?:\+[a-z0-9.]+)?$",
        )
        .expect("static regex")
    })
}

/// PEP 440 ordering for Python distributions.
pub fn parse_pep440(raw: &str) -> Option<VersionKey> {
    let cleaned = strip_requirement(raw)?;
    let caps = pep440_regex().captures(cleaned)?;

    let parts = parse_parts(caps.get(1)?.as_str())?;
    let mut pre = caps.get(2).map(|label| {
        let rank = match label.as_str().to_ascii_lowercase().as_str() {
            "a" | "alpha" => 1,
            "b" | "beta" => 2,
            _ => 3,
        };
        let number = caps.get(3).and_then(|n| n.as_str().parse().ok()).unwrap_or(0);
        (rank, number)
    });
    let post = caps.get(4).map(|n| n.as_str().parse().unwrap_or(0));
    if pre.is_none() && caps.get(5).is_some() {
        let number = caps.get(5).and_then(|n| n.as_str().parse().ok()).unwrap_or(0);
        pre = Some((0, number));
    }

    Some(VersionKey::Release(Release { parts, pre, post }))
}

fn release_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^(\d+(?:\.\d+)*)(?:[-.]?(alpha|a|beta|b|rc|pre)\.?(\d*))?(?:#(\d+))?$")
            .expect("static regex")
    })
}

/// vcpkg / conan versions: dotted numbers, `YYYY-MM-DD` dates and `#n` port revisions.
pub fn parse_release(raw: &str) -> Option<VersionKey> {
    let cleaned = strip_requirement(raw)?;
    let cleaned = if is_date(cleaned) {
        cleaned.replacen('-', ".", 2)
    } else {
        cleaned.to_string()
    };
    let caps = release_regex().captures(&cleaned)?;

    let parts = parse_parts(caps.get(1)?.as_str())?;
    let pre = caps.get(2).map(|label| {
        let rank = match label.as_str().to_ascii_lowercase().as_str() {
            "a" | "alpha" => 1,
            "b" | "beta" => 2,
            _ => 3,
        };
        (rank, caps.get(3).and_then(|n| n.as_str().parse().ok()).unwrap_or(0))
    });
    let post = caps.get(4).and_then(|n| n.as_str().parse().ok());

    Some(VersionKey::Release(Release { parts, pre, post }))
}

fn is_date(version: &str) -> bool {
    let bytes = version.as_bytes();
    version.len() >= 10
        && bytes[4] == b'-'
        && bytes[7] == b'-'
        && version[..4].chars().all(|c| c.is_ascii_digit())
}

fn parse_parts(dotted: &str) -> Option<Vec<u64>> {
    dotted.split('.').map(|p| p.parse::<u64>().ok()).collect()
}
