//! Text animations streamed to terminal clients.
//!
//! A client that opens a raw TCP connection and sends `1\n` or `2\n` gets its
//! address and country redrawn in place every frame until the connection
//! closes or its deadline passes.

use rand::seq::SliceRandom;
use std::io::{self, Write};
use std::thread;
use std::time::{Duration, Instant};

/// Delay between frames.
pub const FRAME_INTERVAL: Duration = Duration::from_millis(200);

/// Faces appended to the banner.
pub const FACES: &[&str] = &["(^_^)", "[o_o]", "(^.^)", "(\".\")", "($.$)"];

/// Right-hand parts of the plane, one per line.
const PLANE: [&str; 5] = [
    "\\                                  ",
    "|      |~\\______/~~\\__  |          ",
    "|______ \\_____======= )-+          ",
    "|                 |/    |          ",
    "/                 ()               ",
];

/// Requested animation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnimationMode {
    /// Scrolling one-line banner
    Banner,
    /// Five-line plane towing the text
    Flight,
}

impl AnimationMode {
    /// Recognize an animation request.
    pub fn from_request(request: &[u8]) -> Option<Self> {
        match request {
            b"1\n" => Some(AnimationMode::Banner),
            b"2\n" => Some(AnimationMode::Flight),
            _ => None,
        }
    }

    /// Name for log lines.
    pub fn as_str(&self) -> &'static str {
        match self {
            AnimationMode::Banner => "Banner",
            AnimationMode::Flight => "Flight",
        }
    }
}

/// Frame state: lines that rotate right by one character per frame.
#[derive(Debug, Clone)]
pub struct Animation {
    mode: AnimationMode,
    lines: Vec<Vec<char>>,
}

impl Animation {
    /// Build the animation for `text`.
    pub fn new(mode: AnimationMode, text: &str) -> Self {
        match mode {
            AnimationMode::Banner => Self::banner(text, random_face()),
            AnimationMode::Flight => Self::flight(text),
        }
    }

    /// Banner carrying `text` followed by `face`.
    pub fn banner(text: &str, face: &str) -> Self {
        let line = format!("{}  {}{}", text, face, " ".repeat(18));
        Self {
            mode: AnimationMode::Banner,
            lines: vec![line.chars().collect()],
        }
    }

    /// Plane towing `text`.
    pub fn flight(text: &str) -> Self {
        let cargo = format!("    {}    ", text);
        let width = cargo.chars().count();
        let fills = [
            "-".repeat(width),
            " ".repeat(width),
            cargo,
            " ".repeat(width),
            "-".repeat(width),
        ];

        let lines = fills
            .iter()
            .zip(PLANE)
            .map(|(fill, tail)| format!(" {}{}", fill, tail).chars().collect())
            .collect();

        Self {
            mode: AnimationMode::Flight,
            lines,
        }
    }

    /// Render the current frame, including the cursor movement that makes
    /// the next frame overwrite it.
    pub fn frame(&self) -> String {
        match self.mode {
            AnimationMode::Banner => {
                let line: String = self.lines[0].iter().collect();
                format!(" [{}]\r", line)
            }
            AnimationMode::Flight => {
                let body = self
                    .lines
                    .iter()
                    .map(|line| line.iter().collect::<String>())
                    .collect::<Vec<_>>()
                    .join("\n");
                format!("{}\r\x1b[4A", body)
            }
        }
    }

    /// Rotate every line one character to the right.
    pub fn advance(&mut self) {
        for line in &mut self.lines {
            let n = 1.min(line.len());
            line.rotate_right(n);
        }
    }
}

/// Pick a banner face at random.
pub fn random_face() -> &'static str {
    FACES.choose(&mut rand::thread_rng()).copied().unwrap_or("(^_^)")
}

/// Write frames until a write fails or `deadline` passes.
pub fn stream<W: Write>(
    writer: &mut W,
    mut animation: Animation,
    interval: Duration,
    deadline: Instant,
) -> io::Result<()> {
    while Instant::now() < deadline {
        writer.write_all(animation.frame().as_bytes())?;
        writer.flush()?;
        thread::sleep(interval);
        animation.advance();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_from_request() {
        assert_eq!(AnimationMode::from_request(b"1\n"), Some(AnimationMode::Banner));
        assert_eq!(AnimationMode::from_request(b"2\n"), Some(AnimationMode::Flight));
        assert_eq!(AnimationMode::from_request(b"1"), None);
        assert_eq!(AnimationMode::from_request(b"3\n"), None);
        assert_eq!(AnimationMode::from_request(b"GET / HTTP/1.1\r\n"), None);
    }

    #[test]
    fn test_banner_frames_rotate() {
        let mut banner = Animation::banner("1.1.1.1 us", "(^_^)");
        let first = banner.frame();
        assert!(first.starts_with(" [1.1.1.1 us  (^_^)"));
        assert!(first.ends_with("]\r"));

        banner.advance();
        // Trailing padding wraps around to the front
        assert!(banner.frame().starts_with(" [ 1.1.1.1 us"));
    }

    #[test]
    fn test_banner_cycles_back() {
        let mut banner = Animation::banner("ab", "(^.^)");
        let first = banner.frame();
        let width = "ab  (^.^)".len() + 18;
        for _ in 0..width {
            banner.advance();
        }
        assert_eq!(banner.frame(), first);
    }

    #[test]
    fn test_flight_layout() {
        let flight = Animation::flight("x");
        let frame = flight.frame();
        assert!(frame.ends_with("\r\x1b[4A"));

        let body = frame.trim_end_matches("\r\x1b[4A");
        let lines: Vec<&str> = body.split('\n').collect();
        assert_eq!(lines.len(), 5);
        assert_eq!(lines[0], format!(" ---------{}", PLANE[0]));
        assert_eq!(lines[2], format!("     x    {}", PLANE[2]));
        assert!(lines.iter().all(|l| l.chars().count() == lines[0].chars().count()));
    }

    #[test]
    fn test_flight_advance_rotates_every_line() {
        let mut flight = Animation::flight("x");
        flight.advance();
        let frame = flight.frame();
        let lines: Vec<&str> = frame.split('\n').collect();
        // Last character of each tail is a space that moved to the front
        assert!(lines[0].starts_with("  -"));
        assert!(lines[2].starts_with("      x"));
    }

    #[test]
    fn test_stream_stops_at_deadline() {
        let mut out = Vec::new();
        let deadline = Instant::now() + Duration::from_millis(50);
        stream(
            &mut out,
            Animation::banner("8.8.8.8 us", "(^_^)"),
            Duration::from_millis(10),
            deadline,
        )
        .unwrap();

        let text = String::from_utf8(out).unwrap();
        assert!(text.matches("]\r").count() >= 2);
    }

    #[test]
    fn test_stream_stops_on_write_error() {
        struct Broken;
        impl Write for Broken {
            fn write(&mut self, _: &[u8]) -> io::Result<usize> {
                Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let deadline = Instant::now() + Duration::from_secs(60);
        let result = stream(
            &mut Broken,
            Animation::flight("8.8.8.8 us"),
            Duration::from_millis(10),
            deadline,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_random_face_is_known() {
        for _ in 0..20 {
            assert!(FACES.contains(&random_face()));
        }
    }
}
