use crate::write::INDENTATION;
use std::io::Write;

const HEADER_PREFIX: &str = "-----> ";

/// Writes a `-----> ` section header.
///
/// Progress output is informational, a failed write must never fail the build. Write errors are
/// logged and otherwise ignored.
pub fn header(mut w: impl Write, title: impl AsRef<str>) {
    write_line(&mut w, HEADER_PREFIX, title.as_ref());
}

/// Writes a message indented to line up with the text of the previous header.
pub fn info(mut w: impl Write, message: impl AsRef<str>) {
    // Each line separately, so multi-line messages stay aligned.
    for line in message.as_ref().split('\n') {
        write_line(&mut w, INDENTATION, line);
    }
}

fn write_line(w: &mut impl Write, prefix: &str, text: &str) {
    if let Err(error) = writeln!(w, "{prefix}{text}").and_then(|()| w.flush()) {
        log::warn!("Could not write build output: {error}");
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_header_and_info() {
        let mut output = Vec::new();

        header(&mut output, "Ruby app detected");
        info(&mut output, "Installing bundler\nUsing ruby 3.3");

        assert_eq!(
            String::from_utf8(output).unwrap(),
            "-----> Ruby app detected\n       Installing bundler\n       Using ruby 3.3\n"
        );
    }
}
