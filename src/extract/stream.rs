use std::fs::File;
use std::io::{BufWriter, ErrorKind, Read, Write};

use sha2::{Digest, Sha256};

use crate::cancel::CancelToken;
use crate::extract::ExtractionError;

/// Buffered destination file that hashes everything written through it.
pub(crate) struct EntryWriter {
    writer: BufWriter<File>,
    written: u64,
    md5: md5::Context,
    sha256: Sha256,
}

impl EntryWriter {
    pub(crate) fn new(file: File, capacity: usize) -> Self {
        Self {
            writer: BufWriter::with_capacity(capacity, file),
            written: 0,
            md5: md5::Context::new(),
            sha256: Sha256::new(),
        }
    }

    /// Copy `reader` to the destination in `buf`-sized chunks, checking the
    /// token before every chunk.
    pub(crate) fn copy_from(
        &mut self,
        reader: &mut dyn Read,
        buf: &mut [u8],
        cancel: &CancelToken,
    ) -> Result<(), ExtractionError> {
        loop {
            if cancel.is_cancelled() {
                return Err(ExtractionError::Cancelled);
            }
            let n = match reader.read(buf) {
                Ok(0) => return Ok(()),
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            };
            self.write_bytes(&buf[..n])?;
        }
    }

    fn write_bytes(&mut self, buf: &[u8]) -> std::io::Result<()> {
        self.writer.write_all(buf)?;
        self.md5.consume(buf);
        self.sha256.update(buf);
        self.written = self.written.saturating_add(buf.len() as u64);
        Ok(())
    }

    /// Flush and return `(size, md5, sha256)`.
    pub(crate) fn finish(mut self) -> std::io::Result<(u64, String, String)> {
        self.writer.flush()?;
        let md5 = format!("{:x}", self.md5.compute());
        let sha256 = hex::encode(self.sha256.finalize());
        Ok((self.written, md5, sha256))
    }
}
