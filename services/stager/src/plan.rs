//! Action plan builder.
//!
//! Maps a staging request plus the resolved file server and compiler onto the
//! exact, ordered list of actions an executor runs. The order is fixed:
//!
//! 1. Download the compiler
//! 2. Download the application source
//! 3. Download each admin buildpack, in the order the caller supplied them
//! 4. Run the compiler
//! 5. Upload the droplet
//! 6. Fetch the result descriptor
//!
//! Later steps read paths written by earlier ones. Building a plan performs
//! no I/O and cannot fail.

use std::time::Duration;

use stager_models::{EnvironmentVariable, ExecutorAction, StagingRequest};

/// Where the compiler is unpacked.
pub const COMPILER_DIR: &str = "/tmp/compiler";

/// Entry point of an unpacked compiler.
pub const COMPILER_RUN_SCRIPT: &str = "/tmp/compiler/run";

/// Where the application source is unpacked.
pub const APP_DIR: &str = "/app";

/// Root of the unpacked admin buildpacks.
pub const BUILDPACKS_DIR: &str = "/tmp/buildpacks";

/// Where the compiler writes the droplet.
pub const OUTPUT_DIR: &str = "/tmp/droplet";

/// The droplet produced by the compiler.
pub const DROPLET_PATH: &str = "/tmp/droplet/droplet.tgz";

/// Where the compiler writes its result descriptor.
pub const RESULT_DIR: &str = "/tmp/result";

/// Result descriptor read back for the caller.
pub const RESULT_FILE: &str = "/tmp/result/result.json";

/// Compiler cache directory.
pub const CACHE_DIR: &str = "/tmp/cache";

/// Hard wall-clock limit for the compiler run.
pub const COMPILE_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// Environment variable names passed to the compiler.
pub mod env {
    pub const APP_DIR: &str = "APP_DIR";
    pub const OUTPUT_DIR: &str = "OUTPUT_DIR";
    pub const RESULT_DIR: &str = "RESULT_DIR";
    pub const BUILDPACKS_DIR: &str = "BUILDPACKS_DIR";
    pub const BUILDPACK_ORDER: &str = "BUILDPACK_ORDER";
    pub const CACHE_DIR: &str = "CACHE_DIR";
}

/// Build the staging plan for `request`.
///
/// `file_server_url` is the base address of a live file server and
/// `compiler` the artifact id resolved for the request's stack.
pub fn build_actions(
    request: &StagingRequest,
    file_server_url: &str,
    compiler: &str,
) -> Vec<ExecutorAction> {
    let buildpacks = &request.admin_buildpacks;
    let mut actions = Vec::with_capacity(buildpacks.len() + 5);

    actions.push(ExecutorAction::download(
        join_url(file_server_url, &["static", compiler]),
        COMPILER_DIR,
        true,
    ));
    actions.push(ExecutorAction::download(&request.download_uri, APP_DIR, true));

    for buildpack in buildpacks {
        actions.push(ExecutorAction::download(
            &buildpack.url,
            format!("{BUILDPACKS_DIR}/{}", buildpack.key),
            true,
        ));
    }

    let buildpack_order = buildpacks
        .iter()
        .map(|buildpack| buildpack.key.as_str())
        .collect::<Vec<_>>()
        .join(",");

    let mut run_env = request.environment.clone();
    run_env.extend([
        EnvironmentVariable::new(env::APP_DIR, APP_DIR),
        EnvironmentVariable::new(env::OUTPUT_DIR, OUTPUT_DIR),
        EnvironmentVariable::new(env::RESULT_DIR, RESULT_DIR),
        EnvironmentVariable::new(env::BUILDPACKS_DIR, BUILDPACKS_DIR),
        EnvironmentVariable::new(env::BUILDPACK_ORDER, buildpack_order),
        EnvironmentVariable::new(env::CACHE_DIR, CACHE_DIR),
    ]);
    actions.push(ExecutorAction::run(COMPILER_RUN_SCRIPT, run_env, COMPILE_TIMEOUT));

    actions.push(ExecutorAction::upload(
        DROPLET_PATH,
        join_url(file_server_url, &["droplet", &request.app_id]),
    ));
    actions.push(ExecutorAction::fetch_result(RESULT_FILE));

    actions
}

/// Append path segments to a base URL with exactly one `/` between parts.
pub fn join_url(base: &str, segments: &[&str]) -> String {
    let mut url = base.trim_end_matches('/').to_string();
    for segment in segments {
        url.push('/');
        url.push_str(segment.trim_matches('/'));
    }
    url
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;
    use stager_models::AdminBuildpack;

    fn request(buildpacks: Vec<AdminBuildpack>, environment: Vec<EnvironmentVariable>) -> StagingRequest {
        StagingRequest {
            app_id: "bunny".to_string(),
            task_id: "hop".to_string(),
            download_uri: "http://example-uri.com/bunny".to_string(),
            stack: "rabbit_hole".to_string(),
            memory_mb: 256,
            disk_mb: 1024,
            admin_buildpacks: buildpacks,
            environment,
        }
    }

    fn run_env(actions: &[ExecutorAction]) -> Vec<EnvironmentVariable> {
        actions
            .iter()
            .find_map(|action| match action {
                ExecutorAction::Run(run) => Some(run.env.clone()),
                _ => None,
            })
            .expect("plan has a run action")
    }

    #[rstest]
    #[case("http://file-server.com/", "http://file-server.com/static/c")]
    #[case("http://file-server.com", "http://file-server.com/static/c")]
    #[case("http://file-server.com//", "http://file-server.com/static/c")]
    fn test_join_url(#[case] base: &str, #[case] expected: &str) {
        assert_eq!(join_url(base, &["static", "c"]), expected);
    }

    #[test]
    fn test_plan_without_buildpacks() {
        let actions = build_actions(&request(vec![], vec![]), "http://fs/", "compiler");

        assert_eq!(
            actions,
            vec![
                ExecutorAction::download("http://fs/static/compiler", "/tmp/compiler", true),
                ExecutorAction::download("http://example-uri.com/bunny", "/app", true),
                ExecutorAction::run(
                    "/tmp/compiler/run",
                    vec![
                        EnvironmentVariable::new("APP_DIR", "/app"),
                        EnvironmentVariable::new("OUTPUT_DIR", "/tmp/droplet"),
                        EnvironmentVariable::new("RESULT_DIR", "/tmp/result"),
                        EnvironmentVariable::new("BUILDPACKS_DIR", "/tmp/buildpacks"),
                        EnvironmentVariable::new("BUILDPACK_ORDER", ""),
                        EnvironmentVariable::new("CACHE_DIR", "/tmp/cache"),
                    ],
                    Duration::from_secs(900),
                ),
                ExecutorAction::upload("/tmp/droplet/droplet.tgz", "http://fs/droplet/bunny"),
                ExecutorAction::fetch_result("/tmp/result/result.json"),
            ]
        );
    }

    #[test]
    fn test_buildpacks_keep_caller_order() {
        let buildpacks = vec![
            AdminBuildpack::new("zfirst-buildpack", "first-buildpack-url"),
            AdminBuildpack::new("asecond-buildpack", "second-buildpack-url"),
        ];
        let actions = build_actions(&request(buildpacks, vec![]), "http://fs/", "compiler");

        assert_eq!(
            actions[2..4],
            [
                ExecutorAction::download("first-buildpack-url", "/tmp/buildpacks/zfirst-buildpack", true),
                ExecutorAction::download("second-buildpack-url", "/tmp/buildpacks/asecond-buildpack", true),
            ]
        );
        assert!(run_env(&actions).contains(&EnvironmentVariable::new(
            "BUILDPACK_ORDER",
            "zfirst-buildpack,asecond-buildpack"
        )));
    }

    fn buildpacks_strategy() -> impl Strategy<Value = Vec<AdminBuildpack>> {
        prop::collection::vec(("[a-z][a-z0-9-]{0,12}", "https?://[a-z]{1,8}\\.com/[a-z]{0,8}"), 0..6)
            .prop_map(|pairs| {
                pairs
                    .into_iter()
                    .map(|(key, url)| AdminBuildpack::new(key, url))
                    .collect()
            })
    }

    fn environment_strategy() -> impl Strategy<Value = Vec<EnvironmentVariable>> {
        prop::collection::vec(("[A-Z_]{1,12}", "[ -~]{0,16}"), 0..6).prop_map(|pairs| {
            pairs
                .into_iter()
                .map(|(name, value)| EnvironmentVariable::new(name, value))
                .collect()
        })
    }

    proptest! {
        #[test]
        fn prop_plan_is_deterministic(
            buildpacks in buildpacks_strategy(),
            environment in environment_strategy(),
        ) {
            let req = request(buildpacks, environment);
            prop_assert_eq!(
                build_actions(&req, "http://fs/", "compiler"),
                build_actions(&req, "http://fs/", "compiler")
            );
        }

        #[test]
        fn prop_plan_shape(
            buildpacks in buildpacks_strategy(),
            environment in environment_strategy(),
        ) {
            let req = request(buildpacks.clone(), environment.clone());
            let actions = build_actions(&req, "http://fs/", "compiler");

            prop_assert_eq!(actions.len(), buildpacks.len() + 5);
            prop_assert_eq!(
                actions.iter().filter(|a| matches!(a, ExecutorAction::FetchResult(_))).count(),
                1
            );
            prop_assert!(matches!(actions.last(), Some(ExecutorAction::FetchResult(_))));

            // Buildpack downloads and BUILDPACK_ORDER agree.
            let downloaded: Vec<String> = actions[2..2 + buildpacks.len()]
                .iter()
                .filter_map(|a| match a {
                    ExecutorAction::Download(d) => d.to.strip_prefix("/tmp/buildpacks/").map(str::to_string),
                    _ => None,
                })
                .collect();
            let env = run_env(&actions);
            let order = env
                .iter()
                .find(|var| var.name == "BUILDPACK_ORDER")
                .map(|var| var.value.clone())
                .unwrap_or_default();
            prop_assert_eq!(downloaded.join(","), order);

            // Caller environment comes first, unchanged.
            prop_assert_eq!(&env[..environment.len()], &environment[..]);
        }
    }
}
