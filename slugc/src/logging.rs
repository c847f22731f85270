use std::io::{self, Write};
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

/// Writes an error header and body in red to stderr.
///
/// Failures to write are ignored, there is nowhere left to report them to.
pub(crate) fn log_error(header: impl AsRef<str>, body: impl AsRef<str>) {
    let mut stream = StandardStream::stderr(ColorChoice::Auto);

    let _ = write_styled_message(
        &mut stream,
        format!("\n[Error: {}]", header.as_ref()),
        ColorSpec::new().set_fg(Some(Color::Red)).set_bold(true),
    )
    .and_then(|()| {
        write_styled_message(&mut stream, body, ColorSpec::new().set_fg(Some(Color::Red)))
    })
    .and_then(|()| stream.flush());
}

// Styles each line separately, so the color doesn't leak into prefixes added by whatever
// is streaming the output to the user.
fn write_styled_message(
    stream: &mut impl WriteColor,
    message: impl AsRef<str>,
    spec: &ColorSpec,
) -> io::Result<()> {
    for line in message.as_ref().split('\n') {
        stream.set_color(spec)?;
        write!(stream, "{line}")?;
        stream.reset()?;
        writeln!(stream)?;
    }

    Ok(())
}
