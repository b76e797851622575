// Constants shared by the worker and its configuration layer.

/// Maximum nesting of composite actions inside composite actions.
pub const COMPOSITE_ACTIONS_MAX_DEPTH: u32 = 9;

/// Origin used for references that do not carry their own host.
pub const DEFAULT_ACTION_INSTANCE: &str = "github.com";

/// Origin that redirected actions are fetched from.
pub const GITHUB_COM_URL: &str = "https://github.com";

/// Org/repo pair of the canonical checkout action.
pub mod checkout {
    pub const ORG: &str = "actions";
    pub const REPO: &str = "checkout";
}

pub mod path {
    pub const ACTION_MANIFEST_YML_FILE: &str = "action.yml";
    pub const ACTION_MANIFEST_YAML_FILE: &str = "action.yaml";

    /// Directory under the cache root holding lock files and markers.
    pub const CACHE_LOCK_DIRECTORY: &str = ".locks";

    /// Prefix of in-flight clone directories under the cache root.
    pub const CACHE_STAGING_PREFIX: &str = ".staging-";

    /// Directory under the user cache dir used when none is configured.
    pub const DEFAULT_CACHE_SUBDIRECTORY: &str = "act";
}

/// Values of `runs.using` in an action manifest.
pub mod runs_using {
    pub const COMPOSITE: &str = "composite";
    pub const DOCKER: &str = "docker";
    pub const NODE_PREFIX: &str = "node";
}

pub mod conditions {
    pub const ALWAYS: &str = "always()";
    pub const SUCCESS: &str = "success()";
    /// Condition that never passes.
    pub const NEVER: &str = "false";
}

pub mod inputs {
    /// `with.path` of the checkout action.
    pub const CHECKOUT_PATH: &str = "path";
    pub const CHECKOUT_REPOSITORY: &str = "repository";
    pub const CHECKOUT_REF: &str = "ref";

    /// Prefix of the environment variables that carry action inputs.
    pub const ENV_PREFIX: &str = "INPUT_";
}

pub mod variables {
    pub const ACTION_CACHE_DIR: &str = "RUNNER_ACTION_CACHE_DIR";
    pub const DEFAULT_ACTION_INSTANCE: &str = "RUNNER_DEFAULT_ACTION_INSTANCE";
    pub const TRUSTED_INSTANCE_URL: &str = "RUNNER_TRUSTED_INSTANCE_URL";
    pub const TRUSTED_INSTANCE_TOKEN: &str = "RUNNER_TRUSTED_INSTANCE_TOKEN";
    pub const SERVICE_PREFIXES: &str = "RUNNER_SERVICE_PREFIXES";
    pub const NO_SKIP_CHECKOUT: &str = "RUNNER_NO_SKIP_CHECKOUT";
    pub const BIND_WORKDIR: &str = "RUNNER_BIND_WORKDIR";
    pub const WORKDIR: &str = "RUNNER_WORKDIR";
    pub const USE_GITIGNORE: &str = "RUNNER_USE_GITIGNORE";
    pub const DEBUG: &str = "RUNNER_DEBUG";
    pub const JSON_LOGS: &str = "RUNNER_JSON_LOGS";

    pub const XDG_CACHE_HOME: &str = "XDG_CACHE_HOME";
    pub const HOME: &str = "HOME";
}
