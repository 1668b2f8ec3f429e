use std::io::Write;

/// The process environment a command writes to.
///
/// `run` reports its summary through [`output`](Host::output) and warnings about an
/// incomplete harvest through [`error`](Host::error), which lets tests capture both.
pub trait Host: Send + Sync {
    fn output(&mut self) -> impl Write;

    fn error(&mut self) -> impl Write;
}

/// Captures everything a command writes, for assertions
#[cfg(test)]
#[derive(Debug, Default)]
pub struct TestHost {
    output_buf: Vec<u8>,
    error_buf: Vec<u8>,
}

#[cfg(test)]
impl TestHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn output_text(&self) -> String {
        String::from_utf8_lossy(&self.output_buf).into_owned()
    }

    pub fn error_text(&self) -> String {
        String::from_utf8_lossy(&self.error_buf).into_owned()
    }
}

#[cfg(test)]
impl Host for TestHost {
    fn output(&mut self) -> impl Write {
        &mut self.output_buf
    }

    fn error(&mut self) -> impl Write {
        &mut self.error_buf
    }
}
