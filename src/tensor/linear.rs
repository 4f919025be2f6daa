//! Vector and matrix products.

use smallvec::SmallVec;

use crate::dtype::Element;
use crate::kernel;
use crate::layout::StrideLayout;
use crate::linalg;
use crate::order::Order;
use crate::shape::Shape;
use crate::tensor::{dense_order, Tensor};
use crate::{Result, StridedError};

fn require_rank<T: Element>(t: &Tensor<T>, rank: usize) -> Result<()> {
    if t.rank() != rank {
        return Err(StridedError::RankMismatch(t.rank(), rank));
    }
    Ok(())
}

impl<T: Element> Tensor<T> {
    // ========================================================================
    // Vector products
    // ========================================================================

    /// Inner product of two vectors of equal length.
    pub fn inner(&self, other: &Tensor<T>) -> Result<T> {
        require_rank(self, 1)?;
        self.vdot(other, 0, self.dim(0))
    }

    /// Inner product restricted to positions `[start, end)`.
    pub fn vdot(&self, other: &Tensor<T>, start: usize, end: usize) -> Result<T> {
        linalg::inner(&self.raw(), &other.raw(), start, end)
    }

    /// Matrix-vector product `self · v`.
    pub fn mv(&self, v: &Tensor<T>, order: Order) -> Result<Tensor<T>> {
        let order = dense_order("mv", order)?;
        require_rank(self, 2)?;
        let out = self.zeros_like::<T>(Shape::of(&[self.dim(0)])?, order)?;
        linalg::mv_into(&out.raw(), &self.raw(), &v.raw(), &self.config)?;
        Ok(out)
    }

    /// Vector-matrix product `self · m`.
    pub fn vtm(&self, m: &Tensor<T>, order: Order) -> Result<Tensor<T>> {
        let order = dense_order("vtm", order)?;
        require_rank(m, 2)?;
        let out = self.zeros_like::<T>(Shape::of(&[m.dim(1)])?, order)?;
        linalg::vtm_into(&out.raw(), &self.raw(), &m.raw(), &self.config)?;
        Ok(out)
    }

    /// Outer product of two vectors as an `(n, m)` matrix in C order.
    pub fn outer(&self, other: &Tensor<T>) -> Result<Tensor<T>> {
        require_rank(self, 1)?;
        require_rank(other, 1)?;
        let (n, m) = (self.dim(0), other.dim(0));
        let a = self.unsqueeze(1)?.expand(1, m)?;
        let b = other.unsqueeze(0)?.expand(0, n)?;
        let out = self.zeros_like::<T>(Shape::of(&[n, m])?, Order::C)?;
        kernel::zip_map_into(&out.raw(), &a.raw(), &b.raw(), &self.config, |x, y| x.mul(y))?;
        Ok(out)
    }

    // ========================================================================
    // Matrix products
    // ========================================================================

    /// Matrix product `self · b` into a new tensor dense in `order`.
    ///
    /// `Order::S` is rejected since the result has no storage to follow.
    pub fn mm(&self, b: &Tensor<T>, order: Order) -> Result<Tensor<T>> {
        let order = dense_order("mm", order)?;
        require_rank(self, 2)?;
        require_rank(b, 2)?;
        if self.dim(1) != b.dim(0) {
            return Err(StridedError::ShapeMismatch(self.dims().to_vec(), b.dims().to_vec()));
        }
        let out = self.zeros_like::<T>(Shape::of(&[self.dim(0), b.dim(1)])?, order)?;
        linalg::mm_into(&out.raw(), &self.raw(), &b.raw(), &self.config)?;
        Ok(out)
    }

    /// Batched matrix product over a leading batch axis.
    ///
    /// A rank-2 operand is shared by every batch; two rank-2 operands give a
    /// batch of one.
    pub fn bmm(&self, b: &Tensor<T>, order: Order) -> Result<Tensor<T>> {
        let order = dense_order("bmm", order)?;
        let (a, b) = match (self.rank(), b.rank()) {
            (2, 2) => (self.unsqueeze(0)?, b.unsqueeze(0)?),
            (3, 2) => (self.clone(), b.unsqueeze(0)?.expand(0, self.dim(0))?),
            (2, 3) => (self.unsqueeze(0)?.expand(0, b.dim(0))?, b.clone()),
            (3, 3) => (self.clone(), b.clone()),
            (ra, rb) => return Err(StridedError::RankMismatch(ra, rb)),
        };
        if a.dim(0) != b.dim(0) || a.dim(2) != b.dim(1) {
            return Err(StridedError::ShapeMismatch(a.dims().to_vec(), b.dims().to_vec()));
        }
        let batch = a.dim(0);
        let out = self.zeros_like::<T>(Shape::of(&[batch, a.dim(1), b.dim(2)])?, order)?;
        tracing::debug!(batch, "batched matrix multiply");
        for i in 0..batch {
            linalg::mm_into(&out.sel(0, i)?.raw(), &a.sel(0, i)?.raw(), &b.sel(0, i)?.raw(), &self.config)?;
        }
        Ok(out)
    }

    /// Batched matrix-vector product: `(batch, m, n) · (batch, n)`.
    pub fn bmv(&self, v: &Tensor<T>, order: Order) -> Result<Tensor<T>> {
        let order = dense_order("bmv", order)?;
        let (m, v) = match (self.rank(), v.rank()) {
            (2, 1) => (self.unsqueeze(0)?, v.unsqueeze(0)?),
            (3, 1) => (self.clone(), v.unsqueeze(0)?.expand(0, self.dim(0))?),
            (2, 2) => (self.unsqueeze(0)?.expand(0, v.dim(0))?, v.clone()),
            (3, 2) => (self.clone(), v.clone()),
            (rm, rv) => return Err(StridedError::RankMismatch(rm, rv)),
        };
        if m.dim(0) != v.dim(0) || m.dim(2) != v.dim(1) {
            return Err(StridedError::ShapeMismatch(m.dims().to_vec(), v.dims().to_vec()));
        }
        let batch = m.dim(0);
        let out = self.zeros_like::<T>(Shape::of(&[batch, m.dim(1)])?, order)?;
        for i in 0..batch {
            linalg::mv_into(&out.sel(0, i)?.raw(), &m.sel(0, i)?.raw(), &v.sel(0, i)?.raw(), &self.config)?;
        }
        Ok(out)
    }

    /// Batched vector-matrix product: `(batch, n) · (batch, n, p)`.
    ///
    /// A batch of vectors against one shared matrix is a plain [`Tensor::mm`].
    pub fn bvtm(&self, m: &Tensor<T>, order: Order) -> Result<Tensor<T>> {
        let order = dense_order("bvtm", order)?;
        let (v, m) = match (self.rank(), m.rank()) {
            (2, 2) => return self.mm(m, order),
            (1, 2) => (self.unsqueeze(0)?, m.unsqueeze(0)?),
            (1, 3) => (self.unsqueeze(0)?.expand(0, m.dim(0))?, m.clone()),
            (2, 3) => (self.clone(), m.clone()),
            (rv, rm) => return Err(StridedError::RankMismatch(rv, rm)),
        };
        if v.dim(0) != m.dim(0) || v.dim(1) != m.dim(1) {
            return Err(StridedError::ShapeMismatch(v.dims().to_vec(), m.dims().to_vec()));
        }
        let batch = v.dim(0);
        let out = self.zeros_like::<T>(Shape::of(&[batch, m.dim(2)])?, order)?;
        for i in 0..batch {
            linalg::vtm_into(&out.sel(0, i)?.raw(), &v.sel(0, i)?.raw(), &m.sel(0, i)?.raw(), &self.config)?;
        }
        Ok(out)
    }

    // ========================================================================
    // Diagonals
    // ========================================================================

    /// For a vector, a square matrix holding it on diagonal `offset`; for a
    /// matrix, a copy of diagonal `offset`. Positive offsets are above the
    /// main diagonal.
    pub fn diag(&self, offset: isize) -> Result<Tensor<T>> {
        let k = offset.unsigned_abs();
        match self.rank() {
            1 => {
                let n = self.dim(0) + k;
                let out = self.zeros_like::<T>(Shape::of(&[n, n])?, Order::C)?;
                let (row, col) = if offset >= 0 { (0, k) } else { (k, 0) };
                let d = out.narrow_all(true, &[row, col], &[n, n])?.diagonal_strip(self.dim(0))?;
                let src = self.copy(Order::C)?;
                crate::copy::copy_into(&d.raw(), &src.raw(), &self.config)?;
                Ok(out)
            }
            2 => {
                let (rows, cols) = (self.dim(0), self.dim(1));
                let (row, col) = if offset >= 0 { (0, k) } else { (k, 0) };
                if row >= rows || col >= cols {
                    return Err(StridedError::InvalidArgument(format!(
                        "diagonal {offset} is outside a {rows}x{cols} matrix"
                    )));
                }
                let len = (rows - row).min(cols - col);
                self.narrow_all(true, &[row, col], &[rows, cols])?
                    .diagonal_strip(len)?
                    .copy(Order::C)
            }
            r => Err(StridedError::RankMismatch(r, 2)),
        }
    }

    /// First `len` elements of the main diagonal of a matrix view.
    fn diagonal_strip(&self, len: usize) -> Result<Tensor<T>> {
        let stride = self.layout.stride(0) + self.layout.stride(1);
        let layout = StrideLayout::from_parts(
            Shape::of(&[len])?,
            self.layout.offset(),
            SmallVec::from_slice(&[stride]),
        );
        Ok(self.view(layout))
    }

    /// Sum of the main diagonal of a square matrix.
    pub fn trace(&self) -> Result<T> {
        self.diagonal_view()?.sum()
    }

    /// Row count of a float matrix whose rows are observations; must
    /// exceed `ddof`.
    fn observations(&self, op: &'static str, ddof: usize) -> Result<usize> {
        self.require_floating(op)?;
        if self.rank() != 2 {
            return Err(StridedError::RankMismatch(self.rank(), 2));
        }
        let n = self.dim(0);
        if n <= ddof {
            return Err(StridedError::InvalidArgument(format!(
                "{op} of {n} observations with ddof {ddof}"
            )));
        }
        Ok(n)
    }

    /// Covariance matrix of the columns, rows being observations, with
    /// `ddof` delta degrees of freedom.
    pub fn cov(&self, ddof: usize, order: Order) -> Result<Tensor<T>> {
        let n = self.observations("cov", ddof)?;
        let centered = self.sub(&self.mean1d(0, Order::C)?)?;
        let mut c = centered.t()?.mm(&centered, order)?;
        c.div_scalar_(T::from_f64((n - ddof) as f64))?;
        Ok(c)
    }

    /// Pearson correlation matrix of the columns.
    pub fn corr(&self, order: Order) -> Result<Tensor<T>> {
        let n = self.observations("corr", 0)?;
        let sd = self.std1d(0, 0, Order::C)?;
        let centered = self.sub(&self.mean1d(0, Order::C)?)?;
        let mut c = centered.t()?.mm(&centered, order)?;
        c.div_scalar_(T::from_f64(n as f64))?;
        c.div_(&sd)?;
        c.div_(&sd.unsqueeze(1)?)?;
        Ok(c)
    }
}
