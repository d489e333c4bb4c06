use arbine::arbiter::Arbiter;
use arbine::assembly::AssemblyParams;
use arbine::config::{ArbiterConfig, ChannelSpec};
use arbine::modulation::ModulatorKind;
use arbine::snapshot::ArbiterAdapter;
use arbine::trace::TraceLog;
use tracing::info;

fn main() {
    tracing_subscriber::fmt().init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() >= 2 && (args[1] == "--help" || args[1] == "-h" || args[1] == "help") {
        print_help();
        return;
    }
    if args.len() >= 2 {
        eprintln!("Unknown command: {}", args[1]);
        print_help();
        std::process::exit(2);
    }

    // Minimal demo:
    // - two channels fed nearly identical constant evidence
    // - lateral inhibition slowly amplifies the small edge
    // - once contrast and relief both hold, the latch commits H1

    let params = AssemblyParams {
        noise_amp: 0.001,
        ..AssemblyParams::default()
    };
    let cfg = ArbiterConfig::default().with_seed(7).with_channels(vec![
        ChannelSpec::uniform("H1", 3, params),
        ChannelSpec::uniform("H2", 3, params),
    ]);

    let mut arbiter = Arbiter::new(cfg).expect("demo config is well-formed");
    arbiter.install_trace(TraceLog::new(256));

    for t in 0..4000u64 {
        arbiter.inject_stimulus("H1", None, 0.021);
        arbiter.inject_stimulus("H2", None, 0.020);

        // A little urgency pressure once the race is underway.
        if t == 100 {
            arbiter.propose_modulation(ModulatorKind::Urgency, 0.2);
        }

        arbiter.tick();

        if t % 100 == 0 {
            let adapter = ArbiterAdapter::new(&arbiter);
            info!(
                step = arbiter.step(),
                winner = %arbiter.winner().map(|w| w.as_str()).unwrap_or("-"),
                h1 = adapter.dominance_of("H1").unwrap_or(0.0),
                h2 = adapter.dominance_of("H2").unwrap_or(0.0),
                contrast = arbiter.contrast(),
                relief = arbiter.relief(),
                "race"
            );
        }

        if arbiter.decision().is_some() {
            break;
        }
    }

    match arbiter.decision() {
        Some(d) => info!(
            winner = %d.winner_channel,
            step = d.step,
            contrast = d.dominance_contrast,
            relief = d.relief_at_commit,
            "committed"
        ),
        None => info!("no decision within the demo window"),
    }

    let snapshot = ArbiterAdapter::new(&arbiter).snapshot();
    match serde_json::to_string_pretty(&snapshot) {
        Ok(json) => println!("{json}"),
        Err(e) => eprintln!("snapshot serialization failed: {e}"),
    }
}

fn print_help() {
    println!("arbine (assembly arbitration engine prototype)");
    println!("usage:");
    println!("  cargo run");
    println!("  cargo run -- --help");
}
