use clap::Parser;
use maestro::cli::commands::ask::AskArgs;
use maestro::cli::commands::mission::{MissionArgs, MissionCommands};
use maestro::cli::commands::settings::{SettingsArgs, SettingsCommands};
use maestro::cli::{Cli, Commands};

#[test]
fn test_parse_mission_run_with_overrides() {
    let cli = Cli::try_parse_from([
        "maestro",
        "mission",
        "run",
        "History of the transistor",
        "--preset",
        "deep",
        "--max-iterations",
        "4",
        "--no-verify",
        "--group",
        "electronics",
        "--group",
        "history",
    ])
    .unwrap();

    match cli.command {
        Commands::Mission(MissionArgs {
            command:
                MissionCommands::Run {
                    goal,
                    groups,
                    web,
                    preset,
                    max_iterations,
                    no_verify,
                    set,
                },
        }) => {
            assert_eq!(goal, "History of the transistor");
            assert_eq!(groups, vec!["electronics", "history"]);
            assert!(!web);
            assert_eq!(preset.as_deref(), Some("deep"));
            assert_eq!(max_iterations, Some(4));
            assert!(no_verify);
            assert!(set.is_empty());
        }
        other => panic!("unexpected command: {other:?}"),
    }
}

#[test]
fn test_parse_mission_list_defaults() {
    let cli = Cli::try_parse_from(["maestro", "mission", "list"]).unwrap();
    match cli.command {
        Commands::Mission(MissionArgs {
            command: MissionCommands::List { phase, limit, all },
        }) => {
            assert!(phase.is_none());
            assert_eq!(limit, 20);
            assert!(!all);
        }
        other => panic!("unexpected command: {other:?}"),
    }
}

#[test]
fn test_parse_ask_with_route() {
    let cli = Cli::try_parse_from([
        "maestro", "ask", "Make it shorter", "-m", "3f2a", "--route", "--json",
    ])
    .unwrap();
    assert!(cli.json);
    match cli.command {
        Commands::Ask(AskArgs {
            question,
            mission,
            route,
        }) => {
            assert_eq!(question, "Make it shorter");
            assert_eq!(mission.as_deref(), Some("3f2a"));
            assert!(route);
        }
        other => panic!("unexpected command: {other:?}"),
    }
}

#[test]
fn test_parse_settings_set() {
    let cli = Cli::try_parse_from(["maestro", "settings", "set", "models.mid", "gpt-4o-mini"])
        .unwrap();
    match cli.command {
        Commands::Settings(SettingsArgs {
            command: SettingsCommands::Set { key, value },
        }) => {
            assert_eq!(key, "models.mid");
            assert_eq!(value, "gpt-4o-mini");
        }
        other => panic!("unexpected command: {other:?}"),
    }
}

#[test]
fn test_owner_comes_from_environment() {
    temp_env::with_var("MAESTRO_OWNER", Some("carol"), || {
        let cli = Cli::try_parse_from(["maestro", "settings", "list"]).unwrap();
        assert_eq!(cli.owner, "carol");

        let cli = Cli::try_parse_from(["maestro", "--owner", "dave", "settings", "list"]).unwrap();
        assert_eq!(cli.owner, "dave");
    });
    temp_env::with_var_unset("MAESTRO_OWNER", || {
        let cli = Cli::try_parse_from(["maestro", "settings", "list"]).unwrap();
        assert_eq!(cli.owner, "local");
    });
}

#[test]
fn test_mission_run_requires_goal() {
    assert!(Cli::try_parse_from(["maestro", "mission", "run"]).is_err());
}
