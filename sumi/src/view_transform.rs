//! # View transform
//!
//! The affine mapping between canvas (texture) space and screen space: offset,
//! rotation, uniform scale. Touch input is unprojected through it before curve
//! generation; the compositor applies it when presenting the canvas.

use cgmath::prelude::*;

type Decomposed2 = cgmath::Decomposed<cgmath::Vector2<f32>, cgmath::Basis2<f32>>;

/// Margin, in screen pixels, around a fitted canvas.
pub const MARGIN: f32 = 8.0;

/// An affine transform for views. Offset, rotation, and uniform scale - enough
/// for pan/zoom/rotate gestures, and always invertible while the scale stays
/// reasonable.
#[derive(Clone, Debug)]
pub struct ViewTransform {
    // Convention: positions the canvas's top-left corner.
    pub decomposed: Decomposed2,
}

#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    /// The transform cannot be inverted anymore, and has become useless.
    /// Occurs if scale gets too close to zero.
    #[error("uninvertable")]
    Uninvertable,
}

impl ViewTransform {
    /// Rotate about this center in screen space such that the center remains in
    /// the same spot in the viewport after rotating.
    pub fn rotate_about(&mut self, view_center: cgmath::Point2<f32>, rotate: cgmath::Rad<f32>) {
        // vec from center to canvas top-left
        let local_center = view_center.to_vec() - self.decomposed.disp;
        let rotate = cgmath::Basis2::from_angle(rotate);

        let local_center = rotate.rotate_vector(local_center);
        self.decomposed.rot = rotate * self.decomposed.rot;
        self.decomposed.disp = view_center.to_vec() - local_center;
    }
    /// Scale about this center in screen space such that the center remains in
    /// the same spot in the viewport after scaling.
    pub fn scale_about(&mut self, view_center: cgmath::Point2<f32>, scale_by: f32) {
        let local_center = view_center.to_vec() - self.decomposed.disp;

        // Scale, then adjust translation by the same factor.
        self.decomposed.scale *= scale_by;
        self.decomposed.disp = view_center.to_vec() - (local_center * scale_by);
    }
    /// Pan by this displacement in screen space.
    pub fn pan(&mut self, delta: cgmath::Vector2<f32>) {
        self.decomposed.disp += delta;
    }
    /// Convert a point in screen space to canvas space.
    pub fn unproject(
        &self,
        view_point: cgmath::Point2<f32>,
    ) -> Result<cgmath::Point2<f32>, TransformError> {
        Ok(self.inverse()?.transform_point(view_point))
    }
    /// Convert a point in canvas space to screen space.
    #[must_use]
    pub fn project(&self, canvas_point: cgmath::Point2<f32>) -> cgmath::Point2<f32> {
        self.decomposed.transform_point(canvas_point)
    }
    /// The screen-to-canvas half of this transform. Compute once when mapping
    /// many points - `unproject` inverts on every call.
    pub fn inverse(&self) -> Result<Decomposed2, TransformError> {
        self.decomposed
            .inverse_transform()
            .ok_or(TransformError::Uninvertable)
    }
    /// Create a transform where the canvas's center is located at `view_center`.
    #[must_use]
    pub fn center_on(
        view_center: cgmath::Point2<f32>,
        canvas_size: cgmath::Vector2<f32>,
        rotation: cgmath::Rad<f32>,
        scale: f32,
    ) -> Self {
        let rot = cgmath::Basis2::from_angle(rotation);
        let disp = view_center.to_vec() - scale * rot.rotate_vector(canvas_size / 2.0);

        Self {
            decomposed: Decomposed2 { scale, rot, disp },
        }
    }
    /// Fit the canvas into a viewport, centered, margins included, no rotation.
    /// `None` if the viewport is too small for a meaningful scale.
    #[must_use]
    pub fn fit(
        canvas_size: cgmath::Vector2<f32>,
        view_size: cgmath::Vector2<f32>,
    ) -> Option<Self> {
        let view_size_margin = view_size - 2.0 * cgmath::vec2(MARGIN, MARGIN);

        // x,y fitting scales - take the smaller.
        let scale = (view_size_margin.x / canvas_size.x).min(view_size_margin.y / canvas_size.y);
        if scale < 0.001 {
            None
        } else {
            Some(Self::center_on(
                cgmath::Point2::from_vec(view_size / 2.0),
                canvas_size,
                cgmath::Rad(0.0),
                scale,
            ))
        }
    }
    /// Identity: canvas pixels map 1:1 onto screen pixels.
    #[must_use]
    pub fn identity() -> Self {
        Self {
            decomposed: Decomposed2 {
                scale: 1.0,
                rot: cgmath::Basis2::from_angle(cgmath::Rad(0.0)),
                disp: cgmath::vec2(0.0, 0.0),
            },
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn assert_close(a: cgmath::Point2<f32>, b: cgmath::Point2<f32>) {
        assert!((a.x - b.x).abs() < 1e-3 && (a.y - b.y).abs() < 1e-3, "{a:?} != {b:?}");
    }

    #[test]
    fn unproject_inverts_project() {
        let mut view = ViewTransform::identity();
        view.pan(cgmath::vec2(40.0, -12.0));
        view.scale_about(cgmath::point2(10.0, 10.0), 2.5);
        view.rotate_about(cgmath::point2(0.0, 0.0), cgmath::Rad(0.7));

        let canvas_point = cgmath::point2(123.0, 45.0);
        let round_trip = view.unproject(view.project(canvas_point)).unwrap();
        assert_close(round_trip, canvas_point);
    }
    #[test]
    fn scale_about_pins_center() {
        let mut view = ViewTransform::identity();
        let center = cgmath::point2(100.0, 50.0);
        let pinned = view.unproject(center).unwrap();
        view.scale_about(center, 3.0);
        assert_close(view.unproject(center).unwrap(), pinned);
    }
    #[test]
    fn fit_centers_canvas() {
        let view =
            ViewTransform::fit(cgmath::vec2(512.0, 512.0), cgmath::vec2(1024.0, 768.0)).unwrap();
        // Canvas center lands on viewport center.
        let projected = view.project(cgmath::point2(256.0, 256.0));
        assert_close(projected, cgmath::point2(512.0, 384.0));
        // And the canvas fits inside the margins vertically (the tight axis).
        let top = view.project(cgmath::point2(256.0, 0.0));
        assert!(top.y >= MARGIN - 1e-3);
    }
    #[test]
    fn degenerate_scale_is_uninvertable() {
        let mut view = ViewTransform::identity();
        view.decomposed.scale = 0.0;
        assert!(view.unproject(cgmath::point2(1.0, 1.0)).is_err());
    }
}
