//! Bulk visibility update

use serde::Serialize;
use tracing::{debug, error, info};

use crate::client::{RegistryApi, RepoFilter};
use crate::config::{SwrConfig, TargetAttr};
use crate::error::Result;

/// Outcome of one updater run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UpdateSummary {
    pub listed: Vec<String>,
    pub updated: Vec<String>,
    pub failed: Vec<String>,
}

impl UpdateSummary {
    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }
}

pub struct RepoAttrUpdater<A> {
    api: A,
    namespace: String,
    filter: RepoFilter,
    target: TargetAttr,
    dry_run: bool,
}

impl<A: RegistryApi> RepoAttrUpdater<A> {
    pub fn new(api: A, config: &SwrConfig) -> Self {
        Self {
            api,
            namespace: config.namespace.clone(),
            filter: RepoFilter::from_config(config),
            target: config.target_attr,
            dry_run: false,
        }
    }

    /// List only, never update
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// List the matching repositories and switch each one to the target attribute.
    ///
    /// A listing failure aborts before any update. A failed update is logged
    /// and the remaining repositories are still processed.
    pub fn run(&self) -> Result<UpdateSummary> {
        info!("Getting repo list need to update...");
        debug!(filter = %self.filter.to_query(), "List request");
        let listed = self.api.list_repos(&self.filter).map_err(|e| {
            error!("Error occurred while fetching repository list: {}", e);
            e
        })?;
        debug!(repos = ?listed, "Repo list");

        let mut summary = UpdateSummary {
            listed,
            ..UpdateSummary::default()
        };
        if summary.listed.is_empty() {
            info!("No repositories to update.");
            return Ok(summary);
        }
        if self.dry_run {
            for repo in &summary.listed {
                info!("Would set {} to {}", repo, self.target);
            }
            return Ok(summary);
        }

        info!(target_attr = %self.target, "Updating repository attribute...");
        let total = summary.listed.len();
        for (i, repo) in summary.listed.iter().enumerate() {
            info!("Updating repo: [{}/{}] {}", i + 1, total, repo);
            match self.api.update_repo(&self.namespace, repo, self.target.is_public()) {
                Ok(()) => summary.updated.push(repo.clone()),
                Err(e) => {
                    error!(repo = %repo, "Error occurred while updating repository attribute: {}", e);
                    summary.failed.push(repo.clone());
                }
            }
        }

        if summary.has_failures() {
            error!(
                "Repository attribute update finished with {} of {} failed",
                summary.failed.len(),
                total
            );
        } else {
            info!("Repository attribute update completed.");
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    use crate::error::SwrError;

    /// In-memory registry that fails updates for the names in `broken`
    struct MockRegistry {
        repos: Option<Vec<&'static str>>,
        broken: Vec<&'static str>,
        filters: RefCell<Vec<RepoFilter>>,
        updates: RefCell<Vec<(String, String, bool)>>,
    }

    impl MockRegistry {
        fn new(repos: Vec<&'static str>) -> Self {
            Self {
                repos: Some(repos),
                broken: Vec::new(),
                filters: RefCell::new(Vec::new()),
                updates: RefCell::new(Vec::new()),
            }
        }
    }

    impl RegistryApi for MockRegistry {
        fn list_repos(&self, filter: &RepoFilter) -> Result<Vec<String>> {
            self.filters.borrow_mut().push(filter.clone());
            match &self.repos {
                Some(repos) => Ok(repos.iter().map(|r| r.to_string()).collect()),
                None => Err(SwrError::Api {
                    status: 401,
                    body: "unauthorized".to_string(),
                }),
            }
        }

        fn update_repo(&self, namespace: &str, repo: &str, is_public: bool) -> Result<()> {
            self.updates
                .borrow_mut()
                .push((namespace.to_string(), repo.to_string(), is_public));
            if self.broken.iter().any(|b| *b == repo) {
                return Err(SwrError::Api {
                    status: 500,
                    body: "boom".to_string(),
                });
            }
            Ok(())
        }
    }

    fn config(target: &str) -> SwrConfig {
        SwrConfig::from_yaml(&format!(
            "ak: AK\nsk: SK\nregion: cn-north-4\nnamespace: team\nlimit: 10\nis_public: true\ntarget_attr: {}\n",
            target
        ))
        .unwrap()
    }

    #[test]
    fn test_updates_every_listed_repo() {
        let registry = MockRegistry::new(vec!["a", "b/c"]);
        let summary = RepoAttrUpdater::new(&registry, &config("private")).run().unwrap();

        assert_eq!(summary.updated, vec!["a", "b/c"]);
        assert!(!summary.has_failures());
        assert_eq!(
            *registry.updates.borrow(),
            vec![
                ("team".to_string(), "a".to_string(), false),
                ("team".to_string(), "b/c".to_string(), false),
            ]
        );
        assert_eq!(registry.filters.borrow()[0].to_query(), "namespace::team|limit::10|is_public::true");
    }

    #[test]
    fn test_failed_update_does_not_stop_loop() {
        let mut registry = MockRegistry::new(vec!["a", "b", "c"]);
        registry.broken = vec!["b"];
        let summary = RepoAttrUpdater::new(&registry, &config("public")).run().unwrap();

        assert_eq!(registry.updates.borrow().len(), 3);
        assert_eq!(summary.updated, vec!["a", "c"]);
        assert_eq!(summary.failed, vec!["b"]);
        assert!(summary.has_failures());
    }

    #[test]
    fn test_empty_list_makes_no_updates() {
        let registry = MockRegistry::new(vec![]);
        let summary = RepoAttrUpdater::new(&registry, &config("public")).run().unwrap();
        assert!(summary.listed.is_empty());
        assert!(registry.updates.borrow().is_empty());
    }

    #[test]
    fn test_list_failure_makes_no_updates() {
        let registry = MockRegistry {
            repos: None,
            ..MockRegistry::new(vec![])
        };
        let result = RepoAttrUpdater::new(&registry, &config("public")).run();
        assert!(matches!(result, Err(SwrError::Api { status: 401, .. })));
        assert!(registry.updates.borrow().is_empty());
    }

    #[test]
    fn test_dry_run_lists_only() {
        let registry = MockRegistry::new(vec!["a", "b"]);
        let summary = RepoAttrUpdater::new(&registry, &config("public"))
            .dry_run(true)
            .run()
            .unwrap();
        assert_eq!(summary.listed.len(), 2);
        assert!(summary.updated.is_empty());
        assert!(registry.updates.borrow().is_empty());
    }
}
