use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Starting tempo in beats per minute
    #[arg(short, long)]
    pub bpm: Option<f32>,

    /// Start the clock immediately instead of waiting for a start command
    #[arg(short, long)]
    pub auto_start: bool,

    /// MIDI output port to send the clock to (substring match)
    #[arg(long)]
    pub midi_output: Option<String>,

    /// Run without a MIDI output, clock pulses are discarded
    #[arg(long)]
    pub null_output: bool,

    /// List available MIDI output ports and exit
    #[arg(long)]
    pub list_outputs: bool,

    /// Configuration file (default /etc/phaselock.toml, optional)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Load the saved tempo at startup
    #[arg(long)]
    pub load_bpm: bool,

    /// File the tempo is saved to and loaded from
    #[arg(long)]
    pub bpm_file: Option<PathBuf>,

    /// Wait for the output queue to drain instead of sleeping between refills
    #[arg(long)]
    pub sync_output: bool,

    /// Default difflock offset in milliseconds
    #[arg(long, allow_hyphen_values = true)]
    pub default_offset: Option<i32>,

    /// Read control commands from stdin
    #[arg(long)]
    pub console: bool,

    /// Disable the progress display
    #[arg(long)]
    pub no_display: bool,

    /// Log to stderr (RUST_LOG aware) instead of the log file
    #[arg(long)]
    pub log_stderr: bool,

    /// Feed beats from a simulated device playing at this tempo
    #[arg(long)]
    pub simulate: Option<f32>,
}

pub fn validate_output(device_name: &str, ports: &[String]) -> Result<(), String> {
    if !ports.iter().any(|p| p.contains(device_name)) {
        let mut error_msg = format!(
            "Error: MIDI output '{}' not found in available ports:\n",
            device_name
        );
        for port in ports {
            error_msg.push_str(&format!("  - {}\n", port));
        }
        return Err(error_msg);
    }
    Ok(())
}
