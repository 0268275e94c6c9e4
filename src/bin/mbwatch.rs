use anyhow::{Context, Result};
use clap::Parser;
use console::style;
use crossbeam_channel::bounded;
use fern::colors::{Color, ColoredLevelConfig};
use log::{debug, info};
use mbmap::coils::{self, CoilLayout};
use mbmap::context::ServerContext;
use mbmap::daemon::Daemon;
use mbmap::registers::{RegisterLayout, Variable};
use mbmap::store::{DataStore, SlaveStore};
use mbmap::threaded::Client;
use mbmap::transport::InMemoryTransport;
use mbmap::{DEFAULT_SLAVE, ServerContextLayout, SlaveContextLayout, Value, Values};
use rand::Rng;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "mbwatch", about = "Watch a simulated Modbus level sensor", version)]
struct Cli {
    /// Daemon period in seconds
    #[arg(short, long, default_value_t = 0.05)]
    period: f64,

    /// Alarm threshold written to the holding registers
    #[arg(short, long, default_value_t = 750)]
    threshold: u16,

    /// Enable verbose reporting (can be used multiple times for increased verbosity)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    set_up_logging(args.verbose);

    println!("{}", style("mbwatch - simulated level sensor").green());

    let store = Arc::new(DataStore::new(BTreeMap::from([(
        DEFAULT_SLAVE,
        SlaveStore::new(16, 16),
    )])));
    let layout = server_layout().context("Failed to build the server layout")?;
    let context = ServerContext::new(Arc::clone(&store), layout.clone());

    // The daemon plays the controller: level above threshold trips the
    // alarm bit.
    let mut daemon = Daemon::new(alarm_job, args.period)?;
    daemon.serve(context.clone())?;

    let mut client = Client::new(
        {
            let store = Arc::clone(&store);
            move || Ok(InMemoryTransport::new(store))
        },
        layout,
    );
    client
        .start(Duration::from_secs(1))
        .context("Failed to start the client")?;
    client.write("threshold", Value::UInt(args.threshold.into()))?;

    let (abort_tx, abort_rx) = bounded::<bool>(0);
    ctrlc::set_handler(move || {
        abort_tx.send(true).ok();
    })
    .expect("Error setting Ctrl-C handler");

    let mut rng = rand::rng();
    let mut level: u16 = 500;
    while abort_rx.try_recv().is_err() {
        level = level
            .saturating_add_signed(rng.random_range(-60..=60))
            .min(1000);
        context.set_input_registers(
            &Values::from([("level".to_owned(), Value::UInt(level.into()))]),
            DEFAULT_SLAVE,
        )?;
        debug!("sensor level set to {level}");

        std::thread::sleep(Duration::from_secs_f64(args.period * 2.0));

        let alarm = client.read_discrete_input("alarm", DEFAULT_SLAVE)?;
        if alarm == Value::Bit(true) {
            info!(
                "{} level {} is above threshold {}",
                style("ALARM").red(),
                level,
                args.threshold
            );
        } else {
            info!("level {} is nominal", level);
        }
    }

    client.stop(Duration::from_secs(1))?;
    daemon.stop()?;
    Ok(())
}

fn server_layout() -> mbmap::Result<ServerContextLayout> {
    Ok(ServerContextLayout::single(SlaveContextLayout {
        holding_registers: Some(RegisterLayout::new(vec![Variable::number(
            "threshold", "u16", None,
        )?])?),
        input_registers: Some(RegisterLayout::new(vec![Variable::number(
            "level", "u16", None,
        )?])?),
        discrete_inputs: Some(CoilLayout::new(vec![coils::Variable::new(
            "alarm", 1, None,
        )?])?),
        ..Default::default()
    }))
}

fn alarm_job(ctx: &ServerContext) -> mbmap::Result<()> {
    let threshold = ctx
        .get_holding_register("threshold", DEFAULT_SLAVE)?
        .as_i64()
        .unwrap_or(0);
    let level = ctx
        .get_input_register("level", DEFAULT_SLAVE)?
        .as_i64()
        .unwrap_or(0);
    ctx.set_discrete_inputs(
        &Values::from([("alarm".to_owned(), Value::Bit(level > threshold))]),
        DEFAULT_SLAVE,
    )
}

fn set_up_logging(verbose: u8) {
    let colors_line = ColoredLevelConfig::new()
        .error(Color::Red)
        .warn(Color::Yellow)
        .info(Color::Green)
        .debug(Color::Blue)
        .trace(Color::BrightBlack);

    fern::Dispatch::new()
        .format(move |out, message, record| {
            out.finish(format_args!(
                "[{} {}] {}",
                chrono::Local::now().format("%H:%M:%S%.6f"),
                colors_line.color(record.level()),
                message
            ))
        })
        .level(if verbose == 0 {
            log::LevelFilter::Info
        } else if verbose == 1 {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Trace
        })
        .chain(std::io::stdout())
        .apply()
        .unwrap();
}
