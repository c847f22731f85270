use crossbeam_utils::thread::ScopedJoinHandle;
use std::io::{self, Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::{panic, thread};

/// Extension trait for [`Command`] to run buildpack executables while streaming their output.
pub(crate) trait CommandExt {
    /// Runs the command to completion, copying stdout and stderr to the given writers while the
    /// process is running.
    ///
    /// Both streams are copied unbuffered and in parallel, so interleaved output stays interleaved
    /// and the caller gets a live view of a long running process. Blocks until the process exited
    /// and both streams have been closed.
    ///
    /// Forwarding is best-effort: once a writer fails, the rest of that stream is read and
    /// discarded, so the process keeps running and its exit status is still returned.
    fn run_and_write_streams<OW: Write + Send, EW: Write + Send>(
        &mut self,
        stdout_write: OW,
        stderr_write: EW,
    ) -> io::Result<ExitStatus>;

    /// Like [`run_and_write_streams`](Self::run_and_write_streams), but captures stdout instead of
    /// forwarding it. stderr is still streamed to the given writer.
    fn run_and_capture_stdout<EW: Write + Send>(
        &mut self,
        stderr_write: EW,
    ) -> io::Result<(ExitStatus, Vec<u8>)>;
}

impl CommandExt for Command {
    fn run_and_write_streams<OW: Write + Send, EW: Write + Send>(
        &mut self,
        stdout_write: OW,
        stderr_write: EW,
    ) -> io::Result<ExitStatus> {
        let mut child = self
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let copy_result = copy_child_process_output(&mut child, stdout_write, stderr_write);
        // Always reap the child, even if forwarding its output failed.
        let status = child.wait()?;

        copy_result.map(|()| status)
    }

    fn run_and_capture_stdout<EW: Write + Send>(
        &mut self,
        stderr_write: EW,
    ) -> io::Result<(ExitStatus, Vec<u8>)> {
        let mut stdout_buffer = Vec::new();

        self.run_and_write_streams(&mut stdout_buffer, stderr_write)
            .map(|status| (status, stdout_buffer))
    }
}

fn copy_child_process_output<OW: Write + Send, EW: Write + Send>(
    child: &mut Child,
    mut stdout_writer: OW,
    mut stderr_writer: EW,
) -> io::Result<()> {
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    // Scoped threads so the writers don't need to be 'static, i.e. a `&mut Vec<u8>` buffer. The
    // writers are moved into the threads and dropped there, which flushes line buffered writers.
    unwind_panic(crossbeam_utils::thread::scope(|scope| {
        let stdout_copy_thread = stdout
            .map(|stdout| scope.spawn(move |_| forward(stdout, &mut stdout_writer)));

        let stderr_copy_thread = stderr
            .map(|stderr| scope.spawn(move |_| forward(stderr, &mut stderr_writer)));

        let stdout_copy_result = stdout_copy_thread.map_or(Ok(()), join_and_unwind_panic);
        let stderr_copy_result = stderr_copy_thread.map_or(Ok(()), join_and_unwind_panic);

        stdout_copy_result.and(stderr_copy_result)
    }))
}

/// Copies `reader` to `writer` until end of file. Only read errors are returned.
fn forward(mut reader: impl Read, mut writer: impl Write) -> io::Result<()> {
    let mut buffer = [0; 8192];

    loop {
        let length = match reader.read(&mut buffer) {
            Ok(0) => return Ok(()),
            Ok(length) => length,
            Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
            Err(error) => return Err(error),
        };

        if let Err(error) = writer.write_all(&buffer[..length]) {
            log::warn!("Discarding subprocess output after failing to forward it: {error}");
            return io::copy(&mut reader, &mut io::sink()).map(|_| ());
        }
    }
}

fn join_and_unwind_panic<T>(h: ScopedJoinHandle<T>) -> T {
    unwind_panic(h.join())
}

fn unwind_panic<T>(t: thread::Result<T>) -> T {
    match t {
        Ok(value) => value,
        Err(err) => panic::resume_unwind(err),
    }
}
