use anyhow::Result;
use regex::Regex;
use crate::types::{Ecosystem, Package};

#[derive(Debug, Clone, Default)]
pub struct FilterConfig {
    pub ecosystem: Option<String>,
    pub name_pattern: Option<String>,
    pub outdated_only: bool,
    /// `dev` or `prod`
    pub kind: Option<String>,
    pub project_prefix: Option<String>,
}

pub struct Filter {
    ecosystem: Option<Ecosystem>,
    name_regex: Option<Regex>,
    outdated_only: bool,
    dev: Option<bool>,
    project_prefix: Option<String>,
}

impl Filter {
    pub fn from_config(config: FilterConfig) -> Result<Self> {
        let name_regex = match config.name_pattern {
            Some(pattern) => Some(Regex::new(&pattern)?),
            None => None,
        };

        let ecosystem = match config.ecosystem.as_deref() {
            Some(raw) => Some(raw.parse::<Ecosystem>().map_err(|e| anyhow::anyhow!(e))?),
            None => None,
        };

        let dev = match config.kind.as_deref() {
            Some("dev") => Some(true),
            Some("prod") => Some(false),
            Some(other) => return Err(anyhow::anyhow!("Unknown dependency kind: {} (expected dev or prod)", other)),
            None => None,
        };

        Ok(Self {
            ecosystem,
            name_regex,
            outdated_only: config.outdated_only,
            dev,
            project_prefix: config.project_prefix,
        })
    }

    pub fn apply(&self, packages: Vec<Package>) -> Vec<Package> {
        packages.into_iter()
            .filter(|pkg| self.matches(pkg))
            .collect()
    }

    fn matches(&self, package: &Package) -> bool {
        if let Some(ecosystem) = self.ecosystem {
            if package.ecosystem != ecosystem {
                return false;
            }
        }

        if let Some(ref regex) = self.name_regex {
            if !regex.is_match(&package.name) {
                return false;
            }
        }

        if self.outdated_only && !package.is_outdated {
            return false;
        }

        if let Some(dev) = self.dev {
            if package.is_dev != dev {
                return false;
            }
        }

        if let Some(ref prefix) = self.project_prefix {
            if !package.project_path.starts_with(prefix.as_str()) {
                return false;
            }
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<Package> {
        let mut outdated = Package::new("/code/web", "react", Ecosystem::JsNpm, "18.2.0");
        outdated.is_outdated = true;
        vec![
            outdated,
            Package::new("/code/web", "vitest", Ecosystem::JsNpm, "1.0.0").dev(true),
            Package::new("/code/api", "requests", Ecosystem::Python, "2.31.0"),
            Package::new("/code/api", "pytest", Ecosystem::Python, "8.0.0").dev(true),
            Package::new("::global::bun", "typescript", Ecosystem::JsBun, "5.4.0"),
        ]
    }

    fn names(packages: Vec<Package>) -> Vec<String> {
        packages.into_iter().map(|p| p.name).collect()
    }

    #[test]
    fn test_filter_by_ecosystem() {
        let filter = Filter::from_config(FilterConfig {
            ecosystem: Some("python".to_string()),
            ..Default::default()
        }).unwrap();

        assert_eq!(names(filter.apply(sample())), vec!["requests", "pytest"]);
    }

    #[test]
    fn test_filter_by_name_pattern() {
        let filter = Filter::from_config(FilterConfig {
            name_pattern: Some("^(py|vi)test$".to_string()),
            ..Default::default()
        }).unwrap();

        assert_eq!(names(filter.apply(sample())), vec!["vitest", "pytest"]);
    }

    #[test]
    fn test_filter_by_kind_and_prefix() {
        let filter = Filter::from_config(FilterConfig {
            kind: Some("prod".to_string()),
            project_prefix: Some("/code/".to_string()),
            ..Default::default()
        }).unwrap();

        assert_eq!(names(filter.apply(sample())), vec!["react", "requests"]);
    }

    #[test]
    fn test_outdated_only() {
        let filter = Filter::from_config(FilterConfig {
            outdated_only: true,
            ..Default::default()
        }).unwrap();

        assert_eq!(names(filter.apply(sample())), vec!["react"]);
    }

    #[test]
    fn test_invalid_settings() {
        assert!(Filter::from_config(FilterConfig {
            kind: Some("optional".to_string()),
            ..Default::default()
        }).is_err());
        assert!(Filter::from_config(FilterConfig {
            ecosystem: Some("cargo".to_string()),
            ..Default::default()
        }).is_err());
        assert!(Filter::from_config(FilterConfig {
            name_pattern: Some("(".to_string()),
            ..Default::default()
        }).is_err());
    }
}
