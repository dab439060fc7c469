use std::io::{self, BufRead, Write};
use std::net::TcpListener;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use callbox::simulator::{self, Simulator};
use callbox::{
    CallState, CallboxConfig, CallboxError, Md8475a, SerialTransport,
    SimulationAppState, SimulationProfile, TcpTransport, Transport,
};
use clap::Parser;
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout};
use ratatui::text::Line;
use ratatui::widgets::{Block, Borders, Paragraph};
use ratatui::Terminal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

type Session = Md8475a<Box<dyn Transport>>;

const BAUD_RATES: [u32; 5] = [9600, 19200, 38400, 57600, 115200];

#[derive(Parser, Debug)]
#[command(name = "callbox_cli", version, about = "Console for the Anritsu MD8475A")]
struct Args {
    /// Session configuration (TOML).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Instrument address. Overrides the configuration file.
    #[arg(short, long)]
    address: Option<String>,

    /// Remote-control port. Overrides the configuration file.
    #[arg(short, long)]
    port: Option<u16>,

    /// Simulation profile applied by the bring-up mode.
    #[arg(long)]
    profile: Option<PathBuf>,
}

// The main entry point for the callbox console.
fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_target(false).with_writer(io::stderr))
        .init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => match CallboxConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("[ERROR] {e}");
                return ExitCode::FAILURE;
            }
        },
        None => CallboxConfig::default(),
    };
    if let Some(address) = args.address {
        config.address = address;
    }
    if let Some(port) = args.port {
        config.port = port;
    }

    match run(&config, args.profile.as_deref()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("[ERROR] {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(config: &CallboxConfig, profile: Option<&std::path::Path>) -> io::Result<()> {
    println!("==========================");
    println!("  MD8475A Callbox Console  ");
    println!("==========================");
    println!("Instrument: {}", config.endpoint());

    let mut session: Option<Session> = None;

    // Main menu loop.
    loop {
        println!("\nSelect mode:");
        println!("  1. Manual Command Input");
        println!("  2. Status Monitor");
        println!("  3. Bring Up Simulation");
        println!("  4. Connect over Serial Port");
        println!("  5. Run Simulator (TCP)");
        println!("  6. Run Simulator (Serial Port)");
        println!("  7. Disconnect");
        println!("  8. Exit");

        match prompt("> ")?.as_str() {
            "1" => {
                if let Some(anritsu) = ensure_connected(&mut session, config) {
                    run_manual_mode(anritsu)?;
                }
            }
            "2" => {
                if let Some(anritsu) = ensure_connected(&mut session, config) {
                    if let Err(e) = run_monitor(anritsu) {
                        eprintln!("[ERROR] Monitor failed: {e}");
                    }
                }
            }
            "3" => {
                if let Some(anritsu) = ensure_connected(&mut session, config) {
                    if let Err(e) = bring_up(anritsu, profile) {
                        eprintln!("[ERROR] Bring-up failed: {e}");
                    }
                }
            }
            "4" => {
                if let Some(anritsu) = connect_serial(config)? {
                    session = Some(anritsu);
                }
            }
            "5" => run_simulator_tcp(config)?,
            "6" => run_simulator_serial()?,
            "7" => {
                if let Some(anritsu) = session.take() {
                    if let Err(e) = anritsu.disconnect() {
                        eprintln!("[ERROR] {e}");
                    }
                    println!("Disconnected.");
                }
            }
            "8" | "" => break,
            _ => eprintln!("[ERROR] Invalid choice. Please enter 1 to 8."),
        }
    }
    Ok(())
}

fn prompt(label: &str) -> io::Result<String> {
    print!("{label}");
    io::stdout().flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().to_string())
}

fn ensure_connected<'a>(session: &'a mut Option<Session>, config: &CallboxConfig) -> Option<&'a Session> {
    if session.is_none() {
        println!("Connecting to {} ...", config.endpoint());
        let opened = TcpTransport::connect(&config.address, config.port, config.connect_timeout)
            .and_then(|t| Md8475a::open(Box::new(t) as Box<dyn Transport>, config));
        match opened {
            Ok(anritsu) => *session = Some(anritsu),
            Err(e) => {
                eprintln!("[ERROR] {e}");
                return None;
            }
        }
    }
    session.as_ref()
}

// Commands ending in '?' are queries; everything else is sent as a checked command.
fn run_manual_mode(anritsu: &Session) -> io::Result<()> {
    println!("\n--- Manual Mode ---");
    println!("Enter commands, or type 'back' to return to the main menu.");
    print!("> ");
    io::stdout().flush()?;

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let input = line?;
        let command = input.trim();

        if command == "back" {
            break;
        }

        if !command.is_empty() {
            let is_query = command
                .split_whitespace()
                .next()
                .is_some_and(|head| head.ends_with('?'));
            let result = if is_query {
                anritsu.query(command).map(Some)
            } else {
                anritsu.command(command).map(|()| None)
            };
            match result {
                Ok(Some(reply)) => println!("< {reply}"),
                Ok(None) => println!("< OK"),
                Err(e) => eprintln!("[ERROR] {e}"),
            }
        }
        print!("> ");
        io::stdout().flush()?;
    }
    Ok(())
}

fn bring_up(anritsu: &Session, profile: Option<&std::path::Path>) -> callbox::Result<()> {
    anritsu.launch()?;
    if let Some(path) = profile {
        let profile = SimulationProfile::load(path)?;
        anritsu.apply_profile(&profile)?;
    }
    anritsu.start_simulation()?;
    println!("Simulation running. Waiting for the device to register ...");
    anritsu.wait_for_ue_registration()?;
    match anritsu.camping_cell() {
        Ok(cell) => println!("Device camped on {} ({}).", cell.bts, cell.rat),
        Err(e) => eprintln!("[WARNING] Could not read camping cell: {e}"),
    }
    Ok(())
}

struct Snapshot {
    app: String,
    voice: String,
    packet: String,
    camping: String,
    phone: String,
    updated: Instant,
}

fn snapshot(anritsu: &Session) -> Snapshot {
    let show = |e: CallboxError| format!("<{e}>");
    let app = anritsu.smartstudio_status();
    let (voice, packet, camping) = match app {
        Ok(SimulationAppState::Running) => match anritsu.call_status() {
            Ok(status) => (
                status.voice.to_string(),
                status.packet.to_string(),
                match (&status.voice, anritsu.camping_cell()) {
                    (CallState::PowerOff, _) => "-".to_string(),
                    (_, Ok(cell)) => format!("{} ({})", cell.bts, cell.rat),
                    (_, Err(e)) => show(e),
                },
            ),
            Err(e) => (show(e), String::new(), String::new()),
        },
        _ => ("-".to_string(), "-".to_string(), "-".to_string()),
    };
    Snapshot {
        app: app.map(|s| s.to_string()).unwrap_or_else(show),
        voice,
        packet,
        camping,
        phone: anritsu
            .virtual_phone()
            .status()
            .map(|s| format!("{s:?}"))
            .unwrap_or_else(show),
        updated: Instant::now(),
    }
}

// Refreshes once a second until 'q' is pressed.
fn run_monitor(anritsu: &Session) -> io::Result<()> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout))?;

    let result = monitor_loop(&mut terminal, anritsu);

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    result
}

fn monitor_loop(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    anritsu: &Session,
) -> io::Result<()> {
    let refresh = Duration::from_secs(1);
    let mut state = snapshot(anritsu);
    loop {
        terminal.draw(|frame| {
            let areas = Layout::default()
                .direction(Direction::Vertical)
                .constraints([Constraint::Length(3), Constraint::Min(0)])
                .split(frame.size());

            let header = Paragraph::new("MD8475A status monitor  (q to quit)")
                .block(Block::default().borders(Borders::ALL));
            frame.render_widget(header, areas[0]);

            let body = Paragraph::new(vec![
                Line::from(format!("Simulation application : {}", state.app)),
                Line::from(format!("Voice call state       : {}", state.voice)),
                Line::from(format!("Packet call state      : {}", state.packet)),
                Line::from(format!("Camping cell           : {}", state.camping)),
                Line::from(format!("Virtual phone          : {}", state.phone)),
                Line::from(format!(
                    "Updated                : {:.1}s ago",
                    state.updated.elapsed().as_secs_f32()
                )),
            ])
            .block(Block::default().title("Status").borders(Borders::ALL));
            frame.render_widget(body, areas[1]);
        })?;

        if event::poll(Duration::from_millis(200))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press && key.code == KeyCode::Char('q') {
                    return Ok(());
                }
            }
        }
        if state.updated.elapsed() >= refresh {
            state = snapshot(anritsu);
        }
    }
}

fn select_serial_port() -> io::Result<Option<(String, u32)>> {
    // List available serial ports.
    let ports = match serialport::available_ports() {
        Ok(ports) => ports,
        Err(e) => {
            eprintln!("[ERROR] Could not enumerate serial ports: {e}");
            return Ok(None);
        }
    };

    if ports.is_empty() {
        eprintln!("[ERROR] No serial ports found.");
        return Ok(None);
    }

    println!("Available serial ports:");
    for (i, port) in ports.iter().enumerate() {
        println!("  {}: {}", i, port.port_name);
    }
    let port_name = match prompt("Select a port (number): ")?.parse::<usize>() {
        Ok(i) if i < ports.len() => ports[i].port_name.clone(),
        _ => {
            eprintln!("[ERROR] Invalid port selection.");
            return Ok(None);
        }
    };

    println!("Available baud rates:");
    for (i, rate) in BAUD_RATES.iter().enumerate() {
        println!("  {i}: {rate}");
    }
    let baud_rate = match prompt("Select a baud rate (number): ")?.parse::<usize>() {
        Ok(i) if i < BAUD_RATES.len() => BAUD_RATES[i],
        _ => {
            eprintln!("[ERROR] Invalid baud rate selection.");
            return Ok(None);
        }
    };

    Ok(Some((port_name, baud_rate)))
}

fn connect_serial(config: &CallboxConfig) -> io::Result<Option<Session>> {
    println!("\n--- Serial Connection ---");
    let Some((port_name, baud_rate)) = select_serial_port()? else {
        return Ok(None);
    };
    let opened = SerialTransport::open(&port_name, baud_rate, config.query_timeout)
        .and_then(|t| Md8475a::open(Box::new(t) as Box<dyn Transport>, config));
    match opened {
        Ok(anritsu) => {
            println!("Connected on {port_name} at {baud_rate} baud.");
            Ok(Some(anritsu))
        }
        Err(e) => {
            eprintln!("[ERROR] {e}");
            Ok(None)
        }
    }
}

fn new_simulator() -> Mutex<Simulator> {
    let mut simulator = Simulator::new();
    // Let a bring-up against the simulator complete on its own.
    simulator.register_after(Some(3));
    Mutex::new(simulator)
}

fn run_simulator_tcp(config: &CallboxConfig) -> io::Result<()> {
    println!("\n--- Simulator (TCP) ---");
    let listener = TcpListener::bind(("0.0.0.0", config.port))?;
    println!("Listening on port {}. Press Ctrl+C to exit.", config.port);
    simulator::serve(listener, &new_simulator())
}

fn run_simulator_serial() -> io::Result<()> {
    println!("\n--- Simulator (Serial Port) ---");
    let Some((port_name, baud_rate)) = select_serial_port()? else {
        return Ok(());
    };

    // Open the selected serial port.
    let port = match serialport::new(&port_name, baud_rate)
        .timeout(Duration::from_millis(10))
        .open()
    {
        Ok(port) => port,
        Err(e) => {
            eprintln!("[ERROR] Failed to open port '{port_name}': {e}");
            return Ok(());
        }
    };

    println!("\nListening on {port_name} at {baud_rate} baud. Press Ctrl+C to exit.");
    simulator::serve_stream(port, &new_simulator())
}
