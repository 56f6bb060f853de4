//! Model snapshots in the safetensors format.

use std::path::{Path, PathBuf};

use dfdx::prelude::*;

use crate::nn::{Discriminator, Generator};
use crate::{Error, Result};

pub fn generator_path<P: AsRef<Path>>(dir: P, iteration: usize) -> PathBuf {
    dir.as_ref()
        .join(format!("gen_iter_{iteration}.safetensors"))
}

pub fn discriminator_path<P: AsRef<Path>>(dir: P, iteration: usize) -> PathBuf {
    dir.as_ref()
        .join(format!("dis_iter_{iteration}.safetensors"))
}

/// Writes `gen_iter_<n>.safetensors` and `dis_iter_<n>.safetensors` into
/// `dir`, creating it if needed. Returns both paths.
pub fn save_models<E: Dtype, D: Device<E>, P: AsRef<Path>>(
    dir: P,
    iteration: usize,
    gen: &Generator<E, D>,
    dis: &Discriminator<E, D>,
) -> Result<(PathBuf, PathBuf)> {
    std::fs::create_dir_all(dir.as_ref())?;
    let gen_path = generator_path(&dir, iteration);
    let dis_path = discriminator_path(&dir, iteration);
    gen.save_safetensors(&gen_path)
        .map_err(|source| Error::SafeTensors {
            path: gen_path.clone(),
            source,
        })?;
    dis.save_safetensors(&dis_path)
        .map_err(|source| Error::SafeTensors {
            path: dis_path.clone(),
            source,
        })?;
    tracing::debug!(gen = %gen_path.display(), dis = %dis_path.display(), "saved snapshot");
    Ok((gen_path, dis_path))
}

/// Restores parameters and batch norm statistics of `gen` from `path`.
pub fn load_generator<E: Dtype, D: Device<E>, P: AsRef<Path>>(
    path: P,
    gen: &mut Generator<E, D>,
) -> Result<()> {
    let path = path.as_ref();
    gen.load_safetensors(path)
        .map_err(|source| Error::SafeTensors {
            path: path.to_path_buf(),
            source,
        })
}

/// Restores parameters and batch norm statistics of `dis` from `path`.
pub fn load_discriminator<E: Dtype, D: Device<E>, P: AsRef<Path>>(
    path: P,
    dis: &mut Discriminator<E, D>,
) -> Result<()> {
    let path = path.as_ref();
    dis.load_safetensors(path)
        .map_err(|source| Error::SafeTensors {
            path: path.to_path_buf(),
            source,
        })
}

/// Names of the tensors stored in a snapshot, sorted.
pub fn tensor_names<P: AsRef<Path>>(path: P) -> Result<Vec<String>> {
    let path = path.as_ref();
    let bytes = std::fs::read(path)?;
    let tensors = dfdx::safetensors::SafeTensors::deserialize(&bytes).map_err(|source| {
        Error::SafeTensors {
            path: path.to_path_buf(),
            source,
        }
    })?;
    let mut names: Vec<String> = tensors.names().into_iter().cloned().collect();
    names.sort();
    Ok(names)
}
