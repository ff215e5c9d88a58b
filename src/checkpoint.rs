//! PLBERT checkpoint handling.
//!
//! A training run saves `step_<N>.t7` files (PyTorch pickles) whose `net`
//! entry holds the state dict of the data-parallel training wrapper:
//!
//! ```text
//! module.encoder.embeddings.word_embeddings.weight
//! module.encoder.encoder.albert_layer_groups.0.albert_layers.0.ffn.weight
//! module.mask_predictor.weight
//! ...
//! ```
//!
//! Remapping strips `module.` and then `encoder.` so the names line up with
//! [`AlbertModel`](crate::model::albert::AlbertModel) parameters. Loading is
//! non-strict: unknown names are ignored and parameters without a
//! checkpoint entry keep their initialization.

use std::collections::HashMap;
use std::io::BufRead;
use std::path::{Path, PathBuf};

use candle_core::pickle::{Object, PthTensors, Stack};
use candle_core::{Device, Tensor};
use candle_nn::VarMap;

use crate::{Error, Result};

/// Checkpoint file name prefix.
pub const CHECKPOINT_PREFIX: &str = "step_";
/// Checkpoint file name suffix.
pub const CHECKPOINT_SUFFIX: &str = ".t7";
/// Top-level pickle key holding the parameter mapping.
pub const STATE_DICT_KEY: &str = "net";
/// Length of `module.`, the data-parallel wrapper prefix.
pub const WRAPPER_PREFIX_LEN: usize = 7;
/// Prefix of the encoder submodule inside the training wrapper.
pub const ENCODER_PREFIX: &str = "encoder.";
/// Buffer saved by older library versions; never a model parameter.
pub const POSITION_IDS_KEY: &str = "embeddings.position_ids";

/// Pickle entry of a `torch.save` zip archive.
const PICKLE_FILE_SUFFIX: &str = "data.pkl";
const OP_SETITEM: u8 = b's';
const OP_SETITEMS: u8 = b'u';

// ---------------------------------------------------------------------------
// Discovery
// ---------------------------------------------------------------------------

/// Step number of a `step_<N>.t7` file name, `None` for anything else.
pub fn parse_step(file_name: &str) -> Option<u64> {
    let digits = file_name
        .strip_prefix(CHECKPOINT_PREFIX)?
        .strip_suffix(CHECKPOINT_SUFFIX)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Path of the regular file in `dir` with the highest step number.
///
/// Steps compare numerically, so `step_10.t7` wins over `step_5.t7`.
/// Only names of the exact form `step_<digits>.t7` are candidates: other
/// `step_*` entries (`step_notes.txt`, `step_.t7`, directories) are skipped
/// with a debug log rather than failing the scan.
pub fn find_latest_checkpoint(dir: &Path) -> Result<PathBuf> {
    let mut latest: Option<(u64, PathBuf)> = None;

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let file_name = entry.file_name();
        let Some(name) = file_name.to_str() else {
            continue;
        };
        if !name.starts_with(CHECKPOINT_PREFIX) {
            continue;
        }
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(step) = parse_step(name) else {
            tracing::debug!(file = name, "ignoring step_ file without a step number");
            continue;
        };
        if latest.as_ref().is_none_or(|(best, _)| step > *best) {
            latest = Some((step, path));
        }
    }

    match latest {
        Some((step, path)) => {
            tracing::info!(step, path = %path.display(), "selected latest checkpoint");
            Ok(path)
        }
        None => Err(Error::NoCheckpoint {
            dir: dir.to_path_buf(),
        }),
    }
}

// ---------------------------------------------------------------------------
// Ordered state dict
// ---------------------------------------------------------------------------

/// Parameter name → tensor, in first-insertion order.
///
/// Re-inserting a name replaces its tensor but keeps its position.
#[derive(Debug, Clone, Default)]
pub struct StateDict {
    entries: Vec<(String, Tensor)>,
    index: HashMap<String, usize>,
}

impl StateDict {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace; returns the replaced tensor.
    pub fn insert(&mut self, name: String, tensor: Tensor) -> Option<Tensor> {
        match self.index.get(&name) {
            Some(&i) => Some(std::mem::replace(&mut self.entries[i].1, tensor)),
            None => {
                self.index.insert(name.clone(), self.entries.len());
                self.entries.push((name, tensor));
                None
            }
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<Tensor> {
        let i = self.index.remove(name)?;
        let (_, tensor) = self.entries.remove(i);
        for pos in self.index.values_mut() {
            if *pos > i {
                *pos -= 1;
            }
        }
        Some(tensor)
    }

    pub fn get(&self, name: &str) -> Option<&Tensor> {
        self.index.get(name).map(|&i| &self.entries[i].1)
    }

    pub fn contains_key(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Tensor)> {
        self.entries.iter().map(|(name, t)| (name.as_str(), t))
    }
}

impl FromIterator<(String, Tensor)> for StateDict {
    fn from_iter<I: IntoIterator<Item = (String, Tensor)>>(iter: I) -> Self {
        let mut state_dict = Self::new();
        for (name, tensor) in iter {
            state_dict.insert(name, tensor);
        }
        state_dict
    }
}

// ---------------------------------------------------------------------------
// Remapping
// ---------------------------------------------------------------------------

/// Map a training-wrapper key to a model parameter name.
///
/// The first 7 characters are always dropped, then a leading `encoder.`.
///
/// ```
/// use plbert_rs::checkpoint::remap_key;
/// assert_eq!(remap_key("module.encoder.embeddings.word_embeddings.weight"), "embeddings.word_embeddings.weight");
/// assert_eq!(remap_key("module.pooler.weight"), "pooler.weight");
/// ```
pub fn remap_key(key: &str) -> &str {
    let name = key
        .char_indices()
        .nth(WRAPPER_PREFIX_LEN)
        .map_or("", |(i, _)| &key[i..]);
    name.strip_prefix(ENCODER_PREFIX).unwrap_or(name)
}

/// Remap every key in checkpoint order and drop [`POSITION_IDS_KEY`].
///
/// Keys that collapse to the same name keep the later tensor.
pub fn remap_state_dict(raw: impl IntoIterator<Item = (String, Tensor)>) -> StateDict {
    let mut state_dict = StateDict::new();
    for (key, tensor) in raw {
        let name = remap_key(&key);
        if state_dict.insert(name.to_string(), tensor).is_some() {
            tracing::debug!(key = %key, name, "remapped key overwrites an earlier entry");
        }
    }
    state_dict.remove(POSITION_IDS_KEY);
    state_dict
}

// ---------------------------------------------------------------------------
// Reading and loading
// ---------------------------------------------------------------------------

/// Read the raw parameter mapping of a checkpoint onto the CPU.
///
/// `.safetensors` files are taken as the flat parameter mapping (sorted by
/// name); anything else is read as a PyTorch pickle and its `net` entry
/// returned in the order the pickle stores it.
pub fn read_checkpoint(path: &Path) -> Result<Vec<(String, Tensor)>> {
    let is_safetensors = path.extension().is_some_and(|ext| ext == "safetensors");
    let tensors = if is_safetensors {
        let mut tensors: Vec<_> = candle_core::safetensors::load(path, &Device::Cpu)?
            .into_iter()
            .collect();
        tensors.sort_by(|a, b| a.0.cmp(&b.0));
        tensors
    } else {
        read_pickle_state_dict(path)?
    };
    tracing::debug!(path = %path.display(), tensors = tensors.len(), "read checkpoint");
    Ok(tensors)
}

/// Tensors under [`STATE_DICT_KEY`] of a `torch.save` archive, in file order.
///
/// candle's reader keeps tensors by name and rebuilds dict items in reverse,
/// so the order is recovered separately with [`pickle_tensor_key_order`].
fn read_pickle_state_dict(path: &Path) -> Result<Vec<(String, Tensor)>> {
    let pth = PthTensors::new(path, Some(STATE_DICT_KEY))?;
    let order = pickle_tensor_key_order(path)?;

    let mut names: Vec<&str> = pth.tensor_infos().keys().map(String::as_str).collect();
    names.sort_by(|a, b| {
        let pos = |name: &str| order.get(name).copied().unwrap_or(usize::MAX);
        pos(a).cmp(&pos(b)).then_with(|| a.cmp(b))
    });

    let mut tensors = Vec::with_capacity(names.len());
    for name in names {
        if let Some(tensor) = pth.get(name)? {
            tensors.push((name.to_string(), tensor));
        }
    }
    Ok(tensors)
}

/// Position of every tensor-valued dict key in the pickle stream.
///
/// Replays `data.pkl` one opcode at a time and, right before each
/// `SETITEM`/`SETITEMS`, records the pending keys whose value rebuilds a
/// torch tensor. A key seen twice keeps its first position.
fn pickle_tensor_key_order(path: &Path) -> Result<HashMap<String, usize>> {
    let file = std::io::BufReader::new(std::fs::File::open(path)?);
    let mut archive = zip::ZipArchive::new(file)?;
    let pkl_name = archive
        .file_names()
        .find(|name| name.ends_with(PICKLE_FILE_SUFFIX))
        .map(str::to_string)
        .ok_or_else(|| {
            Error::WeightLoad(format!("no {PICKLE_FILE_SUFFIX} in {}", path.display()))
        })?;
    let mut reader = std::io::BufReader::new(archive.by_name(&pkl_name)?);

    let mut stack = Stack::empty();
    let mut order = HashMap::new();
    loop {
        let pending = match reader.fill_buf()?.first() {
            Some(&OP_SETITEM) => stack.stack().len().saturating_sub(2),
            Some(&OP_SETITEMS) => stack
                .stack()
                .iter()
                .rposition(|obj| *obj == Object::Mark)
                .map_or(stack.stack().len(), |mark| mark + 1),
            _ => stack.stack().len(),
        };
        for item in stack.stack()[pending..].chunks_exact(2) {
            if let [Object::Unicode(key), value] = item {
                if rebuilds_tensor(value) {
                    let next = order.len();
                    order.entry(key.clone()).or_insert(next);
                }
            }
        }
        if stack.read(&mut reader)? {
            break;
        }
    }
    Ok(order)
}

fn rebuilds_tensor(obj: &Object) -> bool {
    match obj {
        Object::Reduce { callable, .. } => matches!(
            callable.as_ref(),
            Object::Class { module_name, .. } if module_name.starts_with("torch")
        ),
        _ => false,
    }
}

/// Outcome of a non-strict [`load_state_dict`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Parameters overwritten from the state dict.
    pub loaded: Vec<String>,
    /// Model parameters with no state dict entry (initialization kept).
    pub missing: Vec<String>,
    /// State dict entries that name no model parameter.
    pub unexpected: Vec<String>,
    /// Entries skipped because their shape differs from the parameter's.
    pub mismatched: Vec<String>,
}

impl LoadReport {
    /// Every model parameter came from the state dict.
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty() && self.mismatched.is_empty()
    }
}

/// Copy matching entries of `state_dict` into the variables of `varmap`.
///
/// Values are cast to each variable's dtype and device. Nothing about
/// partial coverage is an error.
pub fn load_state_dict(varmap: &VarMap, state_dict: &StateDict) -> Result<LoadReport> {
    let vars = varmap
        .data()
        .lock()
        .map_err(|e| Error::WeightLoad(e.to_string()))?;
    let mut report = LoadReport::default();

    for (name, tensor) in state_dict.iter() {
        let Some(var) = vars.get(name) else {
            report.unexpected.push(name.to_string());
            continue;
        };
        if var.shape() != tensor.shape() {
            tracing::warn!(
                name,
                expected = ?var.shape(),
                found = ?tensor.shape(),
                "skipping checkpoint tensor with mismatched shape"
            );
            report.mismatched.push(name.to_string());
            continue;
        }
        let value = tensor.to_dtype(var.dtype())?.to_device(var.device())?;
        var.set(&value)?;
        report.loaded.push(name.to_string());
    }

    report.missing = vars
        .keys()
        .filter(|name| !state_dict.contains_key(name))
        .cloned()
        .collect();
    report.missing.sort();

    Ok(report)
}
