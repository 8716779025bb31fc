//! Target resolution, by name for manual triggers and by repository for pushes

use url::Url;

use crate::config::app::AppConfig;
use crate::config::engine::{EngineConfig, ModuleConfig};
use crate::config::loader::ConfigSnapshot;
use crate::deploy::target::{engine_target_id, module_target_id, DeployPlan};

/// A descriptor selected for deployment
#[derive(Debug, Clone, Copy)]
pub enum Resolved<'a> {
    App(&'a AppConfig),
    Engine(&'a EngineConfig),
    Module(&'a EngineConfig, &'a ModuleConfig),
}

impl Resolved<'_> {
    pub fn target_id(&self) -> String {
        match self {
            Resolved::App(app) => app.name.clone(),
            Resolved::Engine(engine) => engine_target_id(&engine.name),
            Resolved::Module(engine, module) => module_target_id(&engine.name, &module.name),
        }
    }

    pub fn branch(&self) -> &str {
        match self {
            Resolved::App(app) => &app.branch,
            Resolved::Engine(engine) => &engine.server.branch,
            Resolved::Module(_, module) => &module.branch,
        }
    }

    pub fn plan(&self) -> DeployPlan {
        match self {
            Resolved::App(app) => DeployPlan::for_app(app),
            Resolved::Engine(engine) => DeployPlan::for_engine(engine),
            Resolved::Module(engine, module) => DeployPlan::for_module(engine, module),
        }
    }
}

/// Resolve a manual trigger: applications first, then engines, then modules
/// (`engine:module` or a bare module name)
pub fn resolve_name<'a>(snapshot: &'a ConfigSnapshot, name: &str) -> Option<Resolved<'a>> {
    if let Some(app) = snapshot.find_app(name) {
        return Some(Resolved::App(app));
    }
    if let Some(engine) = snapshot.find_engine(name) {
        return Some(Resolved::Engine(engine));
    }
    snapshot
        .find_module(name)
        .map(|(engine, module)| Resolved::Module(engine, module))
}

/// Every descriptor whose repository matches the pushed repository.
///
/// `full_name` is the `owner/repo` slug from the push payload, `name` the bare
/// repository name. Modules without a repository of their own track the
/// engine's.
pub fn resolve_repository<'a>(snapshot: &'a ConfigSnapshot, full_name: &str, name: &str) -> Vec<Resolved<'a>> {
    let matches_push = |repo: &str| repo_matches(repo, full_name, name);
    let mut matches = Vec::new();

    for app in &snapshot.apps {
        if matches_push(&app.repo) {
            matches.push(Resolved::App(app));
        }
    }
    for engine in &snapshot.engines {
        if matches_push(&engine.server.repo) {
            matches.push(Resolved::Engine(engine));
        }
        for module in engine.modules.values() {
            if matches_push(module.repo.as_deref().unwrap_or(&engine.server.repo)) {
                matches.push(Resolved::Module(engine, module));
            }
        }
    }

    matches
}

/// `owner/repo` of an SSH (`git@host:owner/repo.git`, `ssh://git@host/owner/repo`)
/// or HTTPS repository URL. Only the last two path segments are kept, so
/// hosts that prefix paths (`/scm/org/api.git`) normalize the same way.
pub fn normalize_repo(repo: &str) -> Option<String> {
    let repo = repo.trim();
    if repo.is_empty() {
        return None;
    }

    let path = match Url::parse(repo) {
        Ok(url) if url.has_host() => url.path().to_string(),
        // scp-like syntax is not a URL: user@host:owner/repo.git
        _ => match repo.split_once(':') {
            Some((host, path)) if !host.contains('/') => path.to_string(),
            _ => repo.to_string(),
        },
    };

    let path = path.trim_matches('/');
    let path = path.strip_suffix(".git").unwrap_or(path);
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let slug = segments[segments.len().saturating_sub(2)..].join("/");
    if slug.is_empty() {
        None
    } else {
        Some(slug.to_lowercase())
    }
}

/// The descriptor's `owner/repo` equals the pushed full name or is its
/// trailing `/...` suffix (nested namespaces). A payload without a full name
/// falls back to the bare repository name.
pub fn repo_matches(descriptor_repo: &str, full_name: &str, name: &str) -> bool {
    let Some(slug) = normalize_repo(descriptor_repo) else {
        return false;
    };

    let full_name = full_name.trim_matches('/').to_lowercase();
    if !full_name.is_empty() {
        return full_name == slug || full_name.ends_with(&format!("/{}", slug));
    }

    let name = name.trim_matches('/').to_lowercase();
    !name.is_empty() && slug.rsplit('/').next() == Some(name.as_str())
}
