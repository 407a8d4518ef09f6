//! Process-level memory management.
//!
//! The [`MemoryManager`] owns everything address spaces share: the frame pool, the swap
//! store, and the file system the executables and the swap file live on. It hands out
//! space ids and builds address spaces from executables.

use core::fmt;
use core::sync::atomic::{AtomicU32, Ordering};

use alloc::sync::Arc;
use spin::Once;

use crate::{
    AddressSpace, ConfigError, FileSystem, FramePool, LoadError, NoffHeader, SpaceId,
    SwapStore, VmConfig, config::PAGE_SIZE, loader,
};

/// Errors that can occur while creating an address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnError {
    /// No executable of that name exists.
    ExecutableNotFound,
    /// The executable header is invalid.
    Load(LoadError),
    /// The swap store could not be opened or created.
    SwapUnavailable,
    /// The manager configuration is invalid.
    Config(ConfigError),
}

impl fmt::Display for SpawnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ExecutableNotFound => write!(f, "executable not found"),
            Self::Load(err) => write!(f, "cannot load executable: {}", err),
            Self::SwapUnavailable => write!(f, "swap store unavailable"),
            Self::Config(err) => write!(f, "invalid configuration: {}", err),
        }
    }
}

impl core::error::Error for SpawnError {
    fn source(&self) -> Option<&(dyn core::error::Error + 'static)> {
        match self {
            Self::Load(err) => Some(err),
            Self::Config(err) => Some(err),
            _ => None,
        }
    }
}

impl From<LoadError> for SpawnError {
    fn from(err: LoadError) -> Self {
        Self::Load(err)
    }
}

impl From<ConfigError> for SpawnError {
    fn from(err: ConfigError) -> Self {
        Self::Config(err)
    }
}

/// Creates address spaces over a shared frame pool and swap store.
pub struct MemoryManager {
    config: VmConfig,
    frames: Arc<FramePool>,
    swap: Once<Arc<SwapStore>>,
    file_system: Arc<dyn FileSystem>,
    next_id: AtomicU32,
}

impl MemoryManager {
    /// Creates a manager with `config.physical_frames()` free frames.
    ///
    /// The swap store is opened on the first [`MemoryManager::spawn`].
    pub fn new(config: VmConfig, file_system: Arc<dyn FileSystem>) -> Result<Self, ConfigError> {
        config.validate()?;
        log::info!(
            "memory manager: {} frames of {} bytes, resident limit {}, {} swap slots",
            config.physical_frames(),
            PAGE_SIZE,
            config.resident_limit(),
            config.swap_slots()
        );
        Ok(Self {
            config,
            frames: Arc::new(FramePool::new(config.physical_frames())),
            swap: Once::new(),
            file_system,
            next_id: AtomicU32::new(0),
        })
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    pub fn frames(&self) -> &Arc<FramePool> {
        &self.frames
    }

    /// Returns the swap store, if any address space has been created yet.
    pub fn swap(&self) -> Option<&Arc<SwapStore>> {
        self.swap.get()
    }

    pub fn file_system(&self) -> &Arc<dyn FileSystem> {
        &self.file_system
    }

    /// Creates an address space for the executable `name`.
    ///
    /// No page is made resident; the first access to each page faults it in. The swap store
    /// is only opened once the executable has been accepted.
    pub fn spawn(&self, name: &str) -> Result<AddressSpace, SpawnError> {
        let executable = self
            .file_system
            .open(name)
            .ok_or(SpawnError::ExecutableNotFound)?;
        let header = NoffHeader::read_from(&*executable).inspect_err(|err| {
            log::warn!("rejecting {}: {}", name, err);
        })?;

        let swap = self.swap_store()?.clone();
        let page_table = loader::build_page_table(&header, self.config.stack_pages());

        let id = SpaceId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        log::debug!("spawning {} as space {}", name, id);
        Ok(AddressSpace::new(
            id,
            page_table,
            self.config.resident_limit(),
            executable,
            self.frames.clone(),
            swap,
        ))
    }

    /// Opens the swap file, creating it if it does not exist yet.
    fn swap_store(&self) -> Result<&Arc<SwapStore>, SpawnError> {
        self.swap.try_call_once(|| {
            let name = self.config.swap_file();
            let store = match self.file_system.open(name) {
                Some(store) => store,
                None => self
                    .file_system
                    .create(name, self.config.swap_size())
                    .map_err(|err| {
                        log::warn!("cannot create swap store {}: {}", name, err);
                        SpawnError::SwapUnavailable
                    })?,
            };

            let slots = self.config.swap_slots().min(store.len() / PAGE_SIZE);
            if slots == 0 {
                log::warn!("swap store {} is too small for a single page", name);
                return Err(SpawnError::SwapUnavailable);
            }

            log::info!("swap store {} opened with {} slots", name, slots);
            Ok(Arc::new(SwapStore::new(store, slots)))
        })
    }
}

impl fmt::Debug for MemoryManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryManager")
            .field("config", &self.config)
            .field("frames", &self.frames)
            .field("swap", &self.swap.get())
            .finish()
    }
}
