//! Convolution kernels and the name → operation registry.
//!
//! The registry is an explicit value built once and handed to every executor;
//! there is no global kernel table. Lookups are case-insensitive and total:
//! a name that is not registered resolves to the identity kernel.

use serde::{Deserialize, Serialize};

/// Wire code of the identity (pass-through) operation.
pub const IDENTITY_CODE: i32 = 0;
/// Wire code of the horizontal mirror.
pub const MIRROR_CODE: i32 = 1;
/// Wire code of the first registered kernel; later kernels follow in order.
pub const FIRST_KERNEL_CODE: i32 = 2;

const MIRROR_NAME: &str = "mirror";
const IDENTITY_NAME: &str = "identity";

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum KernelError {
    #[error("kernel has no coefficients")]
    Empty,
    #[error("kernel with {0} coefficients is not square")]
    NotSquare(usize),
    #[error("kernel side {0} is even; only odd sizes are supported")]
    EvenSize(usize),
    #[error("kernel name must not be empty")]
    EmptyName,
    #[error("kernel name `{0}` is reserved")]
    ReservedName(String),
    #[error("kernel `{0}` is already registered")]
    Duplicate(String),
}

/// Square, odd-sized coefficient matrix stored row-major.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f32>", into = "Vec<f32>")]
pub struct Kernel {
    size: usize,
    coeffs: Vec<f32>,
}

impl Kernel {
    pub fn new(coeffs: Vec<f32>) -> Result<Self, KernelError> {
        if coeffs.is_empty() {
            return Err(KernelError::Empty);
        }
        let size = (coeffs.len() as f64).sqrt().round() as usize;
        if size * size != coeffs.len() {
            return Err(KernelError::NotSquare(coeffs.len()));
        }
        if size % 2 == 0 {
            return Err(KernelError::EvenSize(size));
        }
        Ok(Self { size, coeffs })
    }

    /// `[[0,0,0],[0,1,0],[0,0,0]]`
    pub fn identity() -> Self {
        Self {
            size: 3,
            coeffs: vec![0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0],
        }
    }

    pub fn blur() -> Self {
        Self {
            size: 3,
            coeffs: vec![1.0 / 9.0; 9],
        }
    }

    pub fn sharpen() -> Self {
        Self {
            size: 3,
            coeffs: vec![0.0, -1.0, 0.0, -1.0, 5.0, -1.0, 0.0, -1.0, 0.0],
        }
    }

    pub fn edge() -> Self {
        Self {
            size: 3,
            coeffs: vec![-1.0, -1.0, -1.0, -1.0, 8.0, -1.0, -1.0, -1.0, -1.0],
        }
    }

    /// Side length `k`.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Half-width `k / 2`.
    #[inline]
    pub fn radius(&self) -> usize {
        self.size / 2
    }

    #[inline]
    pub fn coeffs(&self) -> &[f32] {
        &self.coeffs
    }

    /// Coefficient applied to window tap `(ii, jj)`.
    ///
    /// The kernel is indexed in reverse, so this is a true convolution.
    #[inline]
    pub fn tap(&self, ii: usize, jj: usize) -> f32 {
        let k = self.size;
        self.coeffs[(k - 1 - ii) * k + (k - 1 - jj)]
    }

    pub fn sum(&self) -> f32 {
        self.coeffs.iter().sum()
    }
}

impl TryFrom<Vec<f32>> for Kernel {
    type Error = KernelError;

    fn try_from(coeffs: Vec<f32>) -> Result<Self, Self::Error> {
        Kernel::new(coeffs)
    }
}

impl From<Kernel> for Vec<f32> {
    fn from(kernel: Kernel) -> Self {
        kernel.coeffs
    }
}

/// One resolved step of an operation chain.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Operation<'r> {
    /// Horizontal flip.
    Mirror,
    /// Boundary-clamped convolution with the borrowed kernel.
    Convolve(&'r Kernel),
}

/// Immutable mapping from operation name to kernel.
#[derive(Clone, Debug)]
pub struct KernelRegistry {
    identity: Kernel,
    entries: Vec<(String, Kernel)>,
}

impl Default for KernelRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl KernelRegistry {
    /// Registry holding no named kernels; every name but `mirror` is identity.
    pub fn empty() -> Self {
        Self {
            identity: Kernel::identity(),
            entries: Vec::new(),
        }
    }

    /// `blur` (code 2), `sharpen` (code 3) and `edge` (code 4).
    pub fn builtin() -> Self {
        Self {
            identity: Kernel::identity(),
            entries: vec![
                ("blur".to_string(), Kernel::blur()),
                ("sharpen".to_string(), Kernel::sharpen()),
                ("edge".to_string(), Kernel::edge()),
            ],
        }
    }

    /// Register an additional kernel under `name`; it receives the next free code.
    pub fn with_kernel(mut self, name: &str, kernel: Kernel) -> Result<Self, KernelError> {
        let key = normalize(name);
        if key.is_empty() {
            return Err(KernelError::EmptyName);
        }
        if key == MIRROR_NAME || key == IDENTITY_NAME {
            return Err(KernelError::ReservedName(key));
        }
        if self.position(&key).is_some() {
            return Err(KernelError::Duplicate(key));
        }
        self.entries.push((key, kernel));
        Ok(self)
    }

    /// Registered kernel names in code order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    /// Kernel registered under `name`, or the identity kernel.
    pub fn lookup(&self, name: &str) -> &Kernel {
        self.position(&normalize(name))
            .map(|idx| &self.entries[idx].1)
            .unwrap_or(&self.identity)
    }

    /// Resolve a user-facing name to an operation.
    pub fn resolve(&self, name: &str) -> Operation<'_> {
        if normalize(name) == MIRROR_NAME {
            Operation::Mirror
        } else {
            Operation::Convolve(self.lookup(name))
        }
    }

    pub fn resolve_all<S: AsRef<str>>(&self, names: &[S]) -> Vec<Operation<'_>> {
        names.iter().map(|n| self.resolve(n.as_ref())).collect()
    }

    /// Small integer code for `name`: mirror → 1, kernels → 2.., unknown → 0.
    pub fn op_code(&self, name: &str) -> i32 {
        let key = normalize(name);
        if key == MIRROR_NAME {
            return MIRROR_CODE;
        }
        match self.position(&key) {
            Some(idx) => FIRST_KERNEL_CODE + idx as i32,
            None => IDENTITY_CODE,
        }
    }

    /// Inverse of [`Self::op_code`]. Unknown codes resolve to identity.
    pub fn operation(&self, code: i32) -> Operation<'_> {
        if code == MIRROR_CODE {
            return Operation::Mirror;
        }
        let kernel = usize::try_from(code - FIRST_KERNEL_CODE)
            .ok()
            .and_then(|idx| self.entries.get(idx))
            .map(|(_, k)| k)
            .unwrap_or(&self.identity);
        Operation::Convolve(kernel)
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.entries.iter().position(|(name, _)| name == key)
    }
}

fn normalize(name: &str) -> String {
    name.trim().to_ascii_lowercase()
}
