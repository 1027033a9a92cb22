//! Terminal output helpers

/// Render a URL as a clickable OSC 8 hyperlink when the terminal supports
/// it, plain cyan text otherwise.
pub fn terminal_link(url: &str) -> String {
    if supports_hyperlinks::on(supports_hyperlinks::Stream::Stdout) {
        format!("\x1b]8;;{}\x07\x1b[36m{}\x1b[0m\x1b]8;;\x07", url, url)
    } else {
        format!("\x1b[36m{}\x1b[0m", url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_link_keeps_url() {
        let url = "http://127.0.0.1:7437/healthz";
        let rendered = terminal_link(url);
        assert!(rendered.contains(url));
        assert!(rendered.contains("\x1b[36m"));
        assert!(rendered.contains("\x1b[0m"));
    }

    #[test]
    fn test_terminal_link_plain_fallback_shape() {
        let url = "http://localhost:7437";
        let rendered = terminal_link(url);
        if !rendered.contains("\x1b]8;;") {
            assert_eq!(rendered, format!("\x1b[36m{}\x1b[0m", url));
        }
    }
}
