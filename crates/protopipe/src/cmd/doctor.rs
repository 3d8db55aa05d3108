use serde::Serialize;

use protopipe_transport::{transport_name, PipeConfig, PipeEndpoint};

use crate::cmd::DoctorArgs;
use crate::exit::{CliResult, HEALTH_CHECK_FAILED, SUCCESS};
use crate::output::OutputFormat;

#[derive(Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "lowercase")]
enum CheckStatus {
    Pass,
    Fail,
    Info,
}

#[derive(Debug, Serialize)]
struct CheckResult {
    name: String,
    status: CheckStatus,
    detail: String,
}

#[derive(Debug, Serialize)]
struct DoctorOutput {
    checks: Vec<CheckResult>,
    overall: &'static str,
}

pub fn run(_args: DoctorArgs, format: OutputFormat) -> CliResult<i32> {
    let config = PipeConfig::from_env();
    let checks = vec![
        platform_transport_check(),
        pipe_bind_check(&config),
        build_info_check(),
    ];

    let has_fail = checks.iter().any(|c| matches!(c.status, CheckStatus::Fail));
    let overall = if has_fail { "fail" } else { "pass" };

    let output = DoctorOutput { checks, overall };
    print_doctor(&output, format);

    if has_fail {
        Ok(HEALTH_CHECK_FAILED)
    } else {
        Ok(SUCCESS)
    }
}

fn print_doctor(output: &DoctorOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(output).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table | OutputFormat::Pretty => {
            println!("protopipe doctor\n");
            for c in &output.checks {
                println!(
                    "  [{:>4}] {:<20} {}",
                    status_text(c.status),
                    c.name,
                    c.detail
                );
            }
            if output.overall == "pass" {
                println!("\n  Result: all checks passed");
            } else {
                println!("\n  Result: one or more checks failed");
            }
        }
        OutputFormat::Raw => {
            println!("{}", output.overall);
        }
    }
}

fn status_text(status: CheckStatus) -> &'static str {
    match status {
        CheckStatus::Pass => "PASS",
        CheckStatus::Fail => "FAIL",
        CheckStatus::Info => "INFO",
    }
}

fn platform_transport_check() -> CheckResult {
    let detail = if cfg!(windows) {
        "byte-mode named pipes available"
    } else {
        "unix domain sockets available"
    };
    CheckResult {
        name: "platform_transport".to_string(),
        status: CheckStatus::Pass,
        detail: format!("{} ({detail})", transport_name()),
    }
}

/// Bind and release a throwaway pipe name.
fn pipe_bind_check(config: &PipeConfig) -> CheckResult {
    let name = format!(
        "protopipe-doctor-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default()
    );
    let location = if cfg!(windows) {
        "pipe namespace".to_string()
    } else {
        config.effective_pipe_dir().display().to_string()
    };

    let result = PipeEndpoint::create_with_config(config.clone()).and_then(|endpoint| {
        endpoint.listen(&name)?;
        endpoint.close();
        Ok(())
    });

    match result {
        Ok(()) => CheckResult {
            name: "pipe_bind".to_string(),
            status: CheckStatus::Pass,
            detail: format!("{location} bind succeeded"),
        },
        Err(err) => CheckResult {
            name: "pipe_bind".to_string(),
            status: CheckStatus::Fail,
            detail: format!("{location} bind failed: {err}"),
        },
    }
}

fn build_info_check() -> CheckResult {
    CheckResult {
        name: "build_info".to_string(),
        status: CheckStatus::Info,
        detail: format!(
            "protopipe {} for {} ({} backend)",
            env!("CARGO_PKG_VERSION"),
            option_env!("PROTOPIPE_BUILD_TARGET").unwrap_or("unknown target"),
            transport_name()
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doctor_output_has_overall_status() {
        let checks = vec![CheckResult {
            name: "x".to_string(),
            status: CheckStatus::Pass,
            detail: "ok".to_string(),
        }];
        let output = DoctorOutput {
            checks,
            overall: "pass",
        };
        let json = serde_json::to_string(&output).expect("doctor output should serialize");
        assert!(json.contains("\"overall\":\"pass\""));
    }

    #[test]
    fn build_info_names_version_and_backend() {
        let check = build_info_check();
        assert!(matches!(check.status, CheckStatus::Info));
        assert!(check.detail.contains(env!("CARGO_PKG_VERSION")));
        assert!(check.detail.contains(transport_name()));
    }

    #[test]
    fn bind_check_fails_for_missing_directory() {
        let config = PipeConfig::default().with_pipe_dir("/nonexistent/protopipe-doctor");
        let check = pipe_bind_check(&config);
        if cfg!(unix) {
            assert!(matches!(check.status, CheckStatus::Fail));
            assert!(check.detail.contains("/nonexistent/protopipe-doctor"));
        }
    }
}
