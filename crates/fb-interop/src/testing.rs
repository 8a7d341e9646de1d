//! In-process stand-in for a sandbox module, used by unit tests.

use std::collections::HashMap;

use crate::channel::ReturnChannel;
use crate::error::{InteropError, Result};
use crate::memory::{check_range, ForeignString, WASM_PAGE_SIZE};
use crate::module::{CallMetrics, SandboxModule};
use crate::request::OrientationSet;

const HEAP_BASE: u32 = 1024;

/// What the fake solve routine does.
pub(crate) enum Behavior {
    /// Allocate and return this text.
    Reply(String),
    /// Return the scramble wrapped in a one-element JSON array.
    Echo,
    /// Push these raw values and nothing else.
    Push(Vec<u32>),
    /// Allocate and return this text, then trap.
    ReplyThenTrap(String),
    /// Push these raw values, then trap.
    PushThenTrap(Vec<u32>),
}

/// Bump-allocated linear memory with a live-range table, a growable page
/// count and a return channel.
pub(crate) struct FakeModule {
    memory: Vec<u8>,
    heap: u32,
    live: HashMap<u32, u32>,
    max_pages: usize,
    behavior: Behavior,
    channel: ReturnChannel,
    pub(crate) masks: Vec<u32>,
    pub(crate) depth_at_call: Vec<usize>,
}

impl FakeModule {
    pub(crate) fn new(behavior: Behavior) -> Self {
        Self {
            memory: vec![0; WASM_PAGE_SIZE],
            heap: HEAP_BASE,
            live: HashMap::new(),
            max_pages: 64,
            behavior,
            channel: ReturnChannel::new(),
            masks: Vec::new(),
            depth_at_call: Vec::new(),
        }
    }

    pub(crate) fn with_max_pages(mut self, pages: usize) -> Self {
        self.max_pages = pages;
        self
    }

    pub(crate) fn pages(&self) -> usize {
        self.memory.len() / WASM_PAGE_SIZE
    }

    pub(crate) fn outstanding_bytes(&self) -> u64 {
        self.live.values().map(|&size| u64::from(size)).sum()
    }

    fn guest_alloc(&mut self, size: u32) -> u32 {
        let ptr = (self.heap + 7) & !7;
        let end = ptr as usize + size as usize;
        if end > self.memory.len() {
            let pages = end.div_ceil(WASM_PAGE_SIZE);
            if pages > self.max_pages {
                return 0;
            }
            self.memory.resize(pages * WASM_PAGE_SIZE, 0);
        }
        self.heap = end as u32;
        if size > 0 {
            self.live.insert(ptr, size);
        }
        ptr
    }

    fn reply(&mut self, text: &[u8]) -> Result<()> {
        let len = text.len() as u32;
        let ptr = self.guest_alloc(len);
        self.write_memory(ptr, text)?;
        self.channel.push(len)?;
        self.channel.push(ptr)
    }
}

impl SandboxModule for FakeModule {
    fn memory_size(&mut self) -> usize {
        self.memory.len()
    }

    fn read_memory(&mut self, ptr: u32, len: u32) -> Result<Vec<u8>> {
        let range = check_range(ptr, len, self.memory.len())?;
        Ok(self.memory[range].to_vec())
    }

    fn write_memory(&mut self, ptr: u32, data: &[u8]) -> Result<()> {
        let range = check_range(ptr, data.len() as u32, self.memory.len())?;
        self.memory[range].copy_from_slice(data);
        Ok(())
    }

    fn alloc(&mut self, size: u32) -> Result<u32> {
        Ok(self.guest_alloc(size))
    }

    fn dealloc(&mut self, ptr: u32, size: u32) -> Result<()> {
        match self.live.remove(&ptr) {
            Some(live) if live == size => Ok(()),
            _ => Err(InteropError::Wasm(format!("bad dealloc({ptr}, {size})"))),
        }
    }

    fn solve(
        &mut self,
        scramble: ForeignString,
        orientations: OrientationSet,
    ) -> Result<CallMetrics> {
        self.masks.push(orientations.bits());
        self.depth_at_call.push(self.channel.depth());

        let input = self.read_memory(scramble.ptr(), scramble.len())?;
        match &self.behavior {
            Behavior::Reply(text) => {
                let text = text.clone().into_bytes();
                self.reply(&text)?;
            }
            Behavior::Echo => {
                let text = serde_json::to_vec(&[String::from_utf8_lossy(&input)])
                    .map_err(|e| InteropError::Wasm(e.to_string()))?;
                self.reply(&text)?;
            }
            Behavior::Push(values) => {
                for value in values.clone() {
                    self.channel.push(value)?;
                }
            }
            Behavior::ReplyThenTrap(text) => {
                let text = text.clone().into_bytes();
                self.reply(&text)?;
                return Err(InteropError::Wasm("unreachable".into()));
            }
            Behavior::PushThenTrap(values) => {
                for value in values.clone() {
                    self.channel.push(value)?;
                }
                return Err(InteropError::Wasm("unreachable".into()));
            }
        }

        Ok(CallMetrics {
            execution_time_us: input.len() as u64,
            fuel_consumed: None,
        })
    }

    fn return_channel(&mut self) -> &mut ReturnChannel {
        &mut self.channel
    }
}
