//! Startup banner and URL display

use super::config::is_all_interfaces;
use super::constants::APP_NAME;
use crate::utils::terminal::terminal_link;

/// Print the startup banner with URLs and the one-time bootstrap token
pub fn print_banner(
    host: &str,
    port: u16,
    bootstrap_token: Option<&str>,
    data_dir: &str,
) {
    let display_host = if is_all_interfaces(host) {
        "localhost"
    } else {
        host
    };

    println!();
    println!(
        "  \x1b[1m\x1b[36m{}\x1b[0m \x1b[90mv{}\x1b[0m",
        APP_NAME,
        env!("CARGO_PKG_VERSION")
    );
    println!();

    const W: usize = 14;

    let base_url = format!("http://{}:{}", display_host, port);
    println!(
        "  \x1b[32m➜\x1b[0m  \x1b[1m{:<W$}\x1b[0m {}",
        "API:",
        terminal_link(&base_url)
    );
    println!(
        "  \x1b[33m➜\x1b[0m  \x1b[1m{:<W$}\x1b[0m ws://{}:{}/ws",
        "Stream:", display_host, port
    );

    if host == "127.0.0.1" || host == "localhost" {
        println!(
            "  \x1b[90m➜  {:<W$} use --host 0.0.0.0 to expose\x1b[0m",
            "Network:"
        );
    } else if is_all_interfaces(host)
        && let Ok(interfaces) = local_ip_address::list_afinet_netifas()
    {
        for (_, ip) in interfaces
            .iter()
            .filter(|(_, ip)| ip.is_ipv4() && !ip.is_loopback())
        {
            let network_url = format!("http://{}:{}", ip, port);
            println!(
                "  \x1b[32m➜\x1b[0m  \x1b[1m{:<W$}\x1b[0m {}",
                "Network:",
                terminal_link(&network_url)
            );
        }
    }

    println!("  \x1b[90m➜  {:<W$} {}\x1b[0m", "Data:", data_dir);

    if let Some(token) = bootstrap_token {
        println!();
        println!(
            "  \x1b[1mRoot credential (shown once, store it now):\x1b[0m \x1b[33m{}\x1b[0m",
            token
        );
    }

    println!();
}
