use crate::estimate::FitError;
use crate::layout::GridLayout;
use ndarray::{Array1, ArrayView1, ArrayView2};

/// A discrete second derivative needs three consecutive nodes.
pub const MIN_NODES_PER_AXIS: usize = 3;

/// Strictly increasing node coordinates along one grid axis.
#[derive(Debug, Clone, PartialEq)]
pub struct GridAxis {
    nodes: Array1<f64>,
    spacing: Array1<f64>,
}

impl GridAxis {
    pub fn new(axis: usize, nodes: Array1<f64>) -> Result<Self, FitError> {
        if nodes.len() < MIN_NODES_PER_AXIS {
            return Err(FitError::InsufficientGridSize {
                axis,
                required: MIN_NODES_PER_AXIS,
                found: nodes.len(),
            });
        }
        if let Some(position) = nodes.iter().position(|v| v.is_infinite()) {
            return Err(FitError::NonFiniteValue {
                field: "grid",
                index: position,
            });
        }
        for position in 1..nodes.len() {
            let previous = nodes[position - 1];
            let current = nodes[position];
            // Negated so that NaN nodes are also rejected.
            if !(current > previous) {
                return Err(FitError::NonMonotonicGrid {
                    axis,
                    position,
                    previous,
                    current,
                });
            }
        }
        let spacing = Array1::from_iter((1..nodes.len()).map(|i| nodes[i] - nodes[i - 1]));
        Ok(Self { nodes, spacing })
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> ArrayView1<'_, f64> {
        self.nodes.view()
    }

    /// Consecutive node differences, one shorter than the node vector.
    pub fn spacing(&self) -> ArrayView1<'_, f64> {
        self.spacing.view()
    }

    pub fn min(&self) -> f64 {
        self.nodes[0]
    }

    pub fn max(&self) -> f64 {
        self.nodes[self.nodes.len() - 1]
    }

    pub fn extent(&self) -> f64 {
        self.max() - self.min()
    }

    pub fn contains(&self, x: f64) -> bool {
        x >= self.min() && x <= self.max()
    }
}

/// Immutable n-dimensional rectilinear grid.
#[derive(Debug, Clone, PartialEq)]
pub struct GridSpec {
    axes: Vec<GridAxis>,
    layout: GridLayout,
}

impl GridSpec {
    pub fn new<I, A>(axes: I) -> Result<Self, FitError>
    where
        I: IntoIterator<Item = A>,
        A: Into<Array1<f64>>,
    {
        let axes = axes
            .into_iter()
            .enumerate()
            .map(|(axis, nodes)| GridAxis::new(axis, nodes.into()))
            .collect::<Result<Vec<_>, _>>()?;
        if axes.is_empty() {
            return Err(FitError::EmptyInput { field: "grid" });
        }
        let shape: Vec<usize> = axes.iter().map(GridAxis::len).collect();
        let layout = GridLayout::new(&shape)?;
        Ok(Self { axes, layout })
    }

    /// Evenly spaced nodes on every axis, given as `(min, max, count)`.
    pub fn uniform(bounds: &[(f64, f64, usize)]) -> Result<Self, FitError> {
        Self::new(
            bounds
                .iter()
                .map(|&(lo, hi, count)| Array1::linspace(lo, hi, count)),
        )
    }

    pub fn ndim(&self) -> usize {
        self.axes.len()
    }

    pub fn axes(&self) -> &[GridAxis] {
        &self.axes
    }

    pub fn axis(&self, axis: usize) -> &GridAxis {
        &self.axes[axis]
    }

    pub fn shape(&self) -> &[usize] {
        self.layout.shape()
    }

    pub fn total_nodes(&self) -> usize {
        self.layout.total_nodes()
    }

    pub fn layout(&self) -> &GridLayout {
        &self.layout
    }

    /// Coordinates of the node at `subscripts`.
    pub fn node_coordinates(&self, subscripts: &[usize]) -> Vec<f64> {
        self.axes
            .iter()
            .zip(subscripts)
            .map(|(axis, &idx)| axis.nodes[idx])
            .collect()
    }

    /// Checks dimensionality and bounds of scattered points, one per row.
    ///
    /// Points on the boundary are accepted; anything outside is an error and is
    /// never clamped.
    pub fn check_points(&self, points: ArrayView2<'_, f64>) -> Result<(), FitError> {
        if points.ncols() != self.ndim() {
            return Err(FitError::InputShape {
                field: "points (columns)",
                expected: self.ndim(),
                found: points.ncols(),
            });
        }
        if points.nrows() == 0 {
            return Err(FitError::EmptyInput { field: "points" });
        }
        for (point, row) in points.outer_iter().enumerate() {
            for (axis, (&value, grid_axis)) in row.iter().zip(&self.axes).enumerate() {
                if !value.is_finite() {
                    return Err(FitError::NonFiniteValue {
                        field: "points",
                        index: point,
                    });
                }
                if !grid_axis.contains(value) {
                    return Err(FitError::DomainBounds {
                        axis,
                        point,
                        value,
                        min: grid_axis.min(),
                        max: grid_axis.max(),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Checks that responses pair 1:1 with points and are all finite.
pub fn check_values(points: ArrayView2<'_, f64>, values: ArrayView1<'_, f64>) -> Result<(), FitError> {
    if values.len() != points.nrows() {
        return Err(FitError::InputShape {
            field: "values",
            expected: points.nrows(),
            found: values.len(),
        });
    }
    if let Some(index) = values.iter().position(|v| !v.is_finite()) {
        return Err(FitError::NonFiniteValue {
            field: "values",
            index,
        });
    }
    Ok(())
}
