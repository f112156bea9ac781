//! Binary persistence for the pipeline's artifacts: normalization statistics,
//! the per-class classifier bank, the per-class regressor bank, and the
//! feature cache directory with per-class positive and ordered negative-batch
//! blobs.
//!
//! All blobs are little-endian and versioned. They are a private exchange
//! format: compatibility is only guaranteed within this crate. A missing file
//! on an explicit load surfaces as [`Error::ArtifactNotFound`]; the caller
//! decides whether to retrain.

use std::fs;
use std::io::{self, Cursor};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use nalgebra::{DMatrix, DVector, RowDVector};

use crate::classifier::{ClassifierKind, Model, ModelBank};
use crate::common::Coxy;
use crate::error::Error;
use crate::refiner::{Regressor, RegressorBank};
use crate::stats::Stats;

const FORMAT_VERSION: i32 = 1;

pub fn save_stats(path: &Path, stats: &Stats) -> Result<(), Error> {
    let mut writer = ArtifactWriter::new();
    writer.write_row_vector(stats.mean());
    writer.write_row_vector(stats.std());
    writer.write_f32(stats.mean_norm());
    writer.persist(path)
}

pub fn load_stats(path: &Path) -> Result<Stats, Error> {
    let mut reader = ArtifactReader::open(path)?;
    let mean = reader.read_row_vector()?;
    let std = reader.read_row_vector()?;
    let mean_norm = reader.read_f32()?;
    Ok(Stats::new(mean, std, mean_norm))
}

pub fn save_model_bank(path: &Path, bank: &ModelBank) -> Result<(), Error> {
    let mut writer = ArtifactWriter::new();
    writer.write_i32(bank.len() as i32);
    for entry in bank {
        match entry {
            None => writer.write_i32(0),
            Some(Model::Gaussian {
                centers,
                alpha,
                sigma,
            }) => {
                writer.write_i32(ClassifierKind::GaussianRls.id());
                writer.write_f32(*sigma);
                writer.write_matrix(centers);
                writer.write_vector(alpha);
            }
            Some(Model::Linear { weights, bias }) => {
                writer.write_i32(ClassifierKind::LinearRls.id());
                writer.write_vector(weights);
                writer.write_f32(*bias);
            }
        }
    }
    writer.persist(path)
}

pub fn load_model_bank(path: &Path) -> Result<ModelBank, Error> {
    let mut reader = ArtifactReader::open(path)?;
    let len = reader.read_len()?;
    let mut bank = Vec::with_capacity(len);
    for _ in 0..len {
        let tag = reader.read_i32()?;
        if tag == 0 {
            bank.push(None);
            continue;
        }
        match ClassifierKind::from(tag) {
            Some(ClassifierKind::GaussianRls) => {
                let sigma = reader.read_f32()?;
                let centers = reader.read_matrix()?;
                let alpha = reader.read_vector()?;
                if alpha.len() != centers.nrows() {
                    return Err(Error::ModelFormat(format!(
                        "gaussian model with {} centers but {} coefficients",
                        centers.nrows(),
                        alpha.len()
                    )));
                }
                bank.push(Some(Model::Gaussian {
                    centers,
                    alpha,
                    sigma,
                }));
            }
            Some(ClassifierKind::LinearRls) => {
                let weights = reader.read_vector()?;
                let bias = reader.read_f32()?;
                bank.push(Some(Model::Linear { weights, bias }));
            }
            None => {
                return Err(Error::ModelFormat(format!(
                    "unexpected classifier kind id: {}",
                    tag
                )))
            }
        }
    }
    Ok(bank)
}

pub fn save_regressor_bank(path: &Path, bank: &RegressorBank) -> Result<(), Error> {
    let mut writer = ArtifactWriter::new();
    writer.write_i32(bank.len() as i32);
    for regressor in bank {
        match regressor.beta() {
            Some(beta) => {
                writer.write_i32(1);
                writer.write_matrix(beta);
            }
            None => writer.write_i32(0),
        }
        writer.write_matrix(regressor.t_inv());
        writer.write_row_vector(regressor.mu());
    }
    writer.persist(path)
}

pub fn load_regressor_bank(path: &Path) -> Result<RegressorBank, Error> {
    let mut reader = ArtifactReader::open(path)?;
    let len = reader.read_len()?;
    let mut bank = Vec::with_capacity(len);
    for _ in 0..len {
        let beta = match reader.read_i32()? {
            0 => None,
            1 => Some(reader.read_matrix()?),
            tag => {
                return Err(Error::ModelFormat(format!(
                    "unexpected regressor tag: {}",
                    tag
                )))
            }
        };
        let t_inv = reader.read_matrix()?;
        let mu = reader.read_row_vector()?;
        bank.push(Regressor::new(beta, t_inv, mu));
    }
    Ok(bank)
}

pub fn save_coxy(path: &Path, coxy: &Coxy) -> Result<(), Error> {
    let mut writer = ArtifactWriter::new();
    writer.write_i32(coxy.len() as i32);
    for &class in &coxy.c {
        writer.write_i32(class as i32);
    }
    writer.write_matrix(&coxy.o);
    writer.write_matrix(&coxy.x);
    writer.write_matrix(&coxy.y);
    writer.persist(path)
}

pub fn load_coxy(path: &Path) -> Result<Coxy, Error> {
    let mut reader = ArtifactReader::open(path)?;
    let len = reader.read_len()?;
    let mut c = Vec::with_capacity(len);
    for _ in 0..len {
        let class = reader.read_i32()?;
        if class < 0 {
            return Err(Error::ModelFormat(format!("negative class id: {}", class)));
        }
        c.push(class as usize);
    }
    let o = reader.read_matrix()?;
    let x = reader.read_matrix()?;
    let y = reader.read_matrix()?;
    let coxy = Coxy { c, o, x, y };
    if coxy.o.nrows() != coxy.len() || coxy.x.nrows() != coxy.len() || coxy.y.nrows() != coxy.len()
    {
        return Err(Error::ModelFormat("misaligned COXY blob".to_string()));
    }
    Ok(coxy)
}

/// Write one class's positive blob and its ordered negative-batch blobs into
/// the feature cache directory.
pub fn save_class_features(
    dir: &Path,
    class: usize,
    positives: &DMatrix<f32>,
    negatives: &[DMatrix<f32>],
) -> Result<(), Error> {
    fs::create_dir_all(dir)?;

    let mut writer = ArtifactWriter::new();
    writer.write_matrix(positives);
    writer.persist(&positives_path(dir, class))?;

    for (batch, shard) in negatives.iter().enumerate() {
        let mut writer = ArtifactWriter::new();
        writer.write_matrix(shard);
        writer.persist(&negatives_path(dir, class, batch))?;
    }
    Ok(())
}

pub fn load_positives(dir: &Path, num_classes: usize) -> Result<Vec<DMatrix<f32>>, Error> {
    (0..num_classes - 1)
        .map(|class| {
            let mut reader = ArtifactReader::open(&positives_path(dir, class))?;
            reader.read_matrix()
        })
        .collect()
}

/// Load each class's ordered negative batches. Batches are probed in mining
/// order until the first missing file; a class with no batch files yields an
/// empty sequence.
pub fn load_negatives(dir: &Path, num_classes: usize) -> Result<Vec<Vec<DMatrix<f32>>>, Error> {
    (0..num_classes - 1)
        .map(|class| {
            let mut shards = Vec::new();
            for batch in 0.. {
                let path = negatives_path(dir, class, batch);
                if !path.exists() {
                    break;
                }
                let mut reader = ArtifactReader::open(&path)?;
                shards.push(reader.read_matrix()?);
            }
            Ok(shards)
        })
        .collect()
}

fn positives_path(dir: &Path, class: usize) -> PathBuf {
    dir.join(format!("positives_{}.bin", class))
}

fn negatives_path(dir: &Path, class: usize, batch: usize) -> PathBuf {
    dir.join(format!("negatives_{}_{}.bin", class, batch))
}

struct ArtifactReader {
    reader: Cursor<Vec<u8>>,
}

impl ArtifactReader {
    fn open(path: &Path) -> Result<Self, Error> {
        let buf = fs::read(path).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                Error::ArtifactNotFound {
                    path: path.to_path_buf(),
                }
            } else {
                Error::Io(e)
            }
        })?;
        let mut reader = ArtifactReader {
            reader: Cursor::new(buf),
        };
        let version = reader.read_i32()?;
        if version != FORMAT_VERSION {
            return Err(Error::ModelFormat(format!(
                "unsupported artifact version: {}",
                version
            )));
        }
        Ok(reader)
    }

    fn read_i32(&mut self) -> Result<i32, Error> {
        Ok(self.reader.read_i32::<LittleEndian>()?)
    }

    fn read_f32(&mut self) -> Result<f32, Error> {
        Ok(self.reader.read_f32::<LittleEndian>()?)
    }

    fn read_len(&mut self) -> Result<usize, Error> {
        let len = self.read_i32()?;
        if len < 0 {
            return Err(Error::ModelFormat(format!("negative length: {}", len)));
        }
        Ok(len as usize)
    }

    fn read_matrix(&mut self) -> Result<DMatrix<f32>, Error> {
        let rows = self.read_len()?;
        let cols = self.read_len()?;
        let mut data = vec![0.0f32; rows * cols];
        for value in &mut data {
            *value = self.read_f32()?;
        }
        Ok(DMatrix::from_row_slice(rows, cols, &data))
    }

    fn read_vector(&mut self) -> Result<DVector<f32>, Error> {
        let len = self.read_len()?;
        let mut data = vec![0.0f32; len];
        for value in &mut data {
            *value = self.read_f32()?;
        }
        Ok(DVector::from_vec(data))
    }

    fn read_row_vector(&mut self) -> Result<RowDVector<f32>, Error> {
        Ok(self.read_vector()?.transpose())
    }
}

struct ArtifactWriter {
    buf: Vec<u8>,
}

impl ArtifactWriter {
    fn new() -> Self {
        let mut writer = ArtifactWriter { buf: Vec::new() };
        writer.write_i32(FORMAT_VERSION);
        writer
    }

    fn write_i32(&mut self, value: i32) {
        self.buf
            .write_i32::<LittleEndian>(value)
            .expect("writing to an in-memory buffer cannot fail");
    }

    fn write_f32(&mut self, value: f32) {
        self.buf
            .write_f32::<LittleEndian>(value)
            .expect("writing to an in-memory buffer cannot fail");
    }

    fn write_matrix(&mut self, m: &DMatrix<f32>) {
        self.write_i32(m.nrows() as i32);
        self.write_i32(m.ncols() as i32);
        for i in 0..m.nrows() {
            for j in 0..m.ncols() {
                self.write_f32(m[(i, j)]);
            }
        }
    }

    fn write_vector(&mut self, v: &DVector<f32>) {
        self.write_i32(v.len() as i32);
        for value in v.iter() {
            self.write_f32(*value);
        }
    }

    fn write_row_vector(&mut self, v: &RowDVector<f32>) {
        self.write_i32(v.len() as i32);
        for value in v.iter() {
            self.write_f32(*value);
        }
    }

    fn persist(self, path: &Path) -> Result<(), Error> {
        Ok(fs::write(path, self.buf)?)
    }
}
