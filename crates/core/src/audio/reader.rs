use std::{
    io::{ErrorKind, Read},
    thread,
    time::Duration,
};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};

use super::{AudioSource, BlockAssembler, BlockClock, Pacer, SampleBlock};
use crate::{LightingError, Result};

const CHUNK_QUEUE: usize = 16;
const MIN_WAIT: Duration = Duration::from_millis(50);

type Chunk = std::result::Result<Vec<u8>, String>;

/// Reads raw little-endian `f32` mono PCM from any byte stream, such as a
/// pipe from `parec`/`arecord` on standard input.
///
/// The stream is read on a helper thread, so an idle pipe shows up as a
/// recoverable underrun instead of blocking the caller. The helper stays
/// parked in `read` until data or end of file arrives.
pub struct ReaderSource<R> {
    reader: Option<R>,
    chunks: Option<Receiver<Chunk>>,
    assembler: BlockAssembler,
    sample_rate: u32,
    block_size: usize,
    wait: Duration,
    pacer: Option<Pacer>,
    finished: bool,
}

impl<R: Read + Send + 'static> ReaderSource<R> {
    pub fn new(reader: R, sample_rate: u32, block_size: usize) -> Self {
        let clock = BlockClock::new(sample_rate, block_size);
        Self {
            reader: Some(reader),
            chunks: None,
            assembler: BlockAssembler::new(sample_rate, block_size),
            sample_rate,
            block_size,
            wait: (clock.block_duration() * 4).max(MIN_WAIT),
            pacer: None,
            finished: false,
        }
    }

    /// Throttles reads to real time, for replaying files rather than pipes.
    pub fn paced(mut self) -> Self {
        let clock = BlockClock::new(self.sample_rate, self.block_size);
        self.pacer = Some(Pacer::new(clock.block_duration()));
        self
    }

    fn chunks(&mut self) -> Result<&Receiver<Chunk>> {
        if self.chunks.is_none() {
            let reader = self
                .reader
                .take()
                .ok_or_else(|| LightingError::msg("input stream already consumed"))?;
            self.chunks = Some(spawn_reader(reader, self.block_size * 4)?);
        }
        self.chunks
            .as_ref()
            .ok_or_else(|| LightingError::msg("input reader is not running"))
    }
}

fn spawn_reader<R: Read + Send + 'static>(mut reader: R, chunk_len: usize) -> Result<Receiver<Chunk>> {
    let (tx, rx) = bounded(CHUNK_QUEUE);
    thread::Builder::new()
        .name("pulsedmx-pcm-reader".to_string())
        .spawn(move || loop {
            let mut bytes = vec![0u8; chunk_len];
            match reader.read_exact(&mut bytes) {
                Ok(()) => {
                    if tx.send(Ok(bytes)).is_err() {
                        break;
                    }
                }
                Err(err) if err.kind() == ErrorKind::UnexpectedEof => break,
                Err(err) => {
                    let _ = tx.send(Err(err.to_string()));
                    break;
                }
            }
        })?;
    Ok(rx)
}

impl<R: Read + Send + 'static> AudioSource for ReaderSource<R> {
    fn next_block(&mut self) -> Result<SampleBlock> {
        if let Some(pacer) = self.pacer.as_mut() {
            pacer.wait();
        }
        if self.finished {
            return Err(LightingError::DeviceLost("input stream ended".to_string()));
        }

        let wait = self.wait;
        let received = self.chunks()?.recv_timeout(wait);
        let bytes = match received {
            Ok(Ok(bytes)) => bytes,
            Ok(Err(message)) => return Err(LightingError::DeviceLost(message)),
            Err(RecvTimeoutError::Timeout) => {
                return Err(LightingError::DeviceLost("input underrun".to_string()))
            }
            Err(RecvTimeoutError::Disconnected) => {
                self.finished = true;
                return Err(LightingError::DeviceLost("input stream ended".to_string()));
            }
        };

        let samples: Vec<f32> = bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();

        self.assembler
            .push(&samples)
            .pop()
            .ok_or_else(|| LightingError::msg("reader produced an incomplete block"))
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn block_size(&self) -> usize {
        self.block_size
    }

    fn describe(&self) -> String {
        format!("raw f32 stream at {} Hz", self.sample_rate)
    }
}
