//! Frame capability handed to animation code.
//!
//! The handle is the only way user code can affect output. Every call is
//! total: bad coordinates are ignored, channel values are clamped, a color
//! that is not a table does nothing.
//!
//! # Usage in Lua
//!
//! ```lua
//! frame:set_pixel(x, y, { r = 255, g = 40 })   -- b defaults to 0
//! local c = frame:get_pixel(x, y)              -- { r = .., g = .., b = .. }
//! frame:fill({ r = 10, g = 10, b = 10 })
//! frame:clear()
//! print(frame.width, frame.height)
//! ```
//!
//! `setPixel` and `getPixel` are accepted as aliases.

use mlua::{Table, UserData, UserDataFields, UserDataMethods, Value};

use crate::frame::{Frame, FrameSize, CHANNELS};

/// An RGB color after clamping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rgb {
    /// Red.
    pub r: u8,
    /// Green.
    pub g: u8,
    /// Blue.
    pub b: u8,
}

impl Rgb {
    /// Read a `{ r, g, b }` table. Returns `None` for anything but a table.
    fn from_lua(value: &Value) -> Option<Self> {
        match value {
            Value::Table(table) => Some(Self {
                r: channel(table, "r"),
                g: channel(table, "g"),
                b: channel(table, "b"),
            }),
            _ => None,
        }
    }
}

/// Floor and clamp a channel value; anything non-numeric is 0.
fn channel(table: &Table, key: &str) -> u8 {
    match table.get::<Value>(key) {
        Ok(Value::Integer(i)) => i.clamp(0, 255) as u8,
        Ok(Value::Number(n)) => clamp_channel(n),
        _ => 0,
    }
}

fn clamp_channel(n: f64) -> u8 {
    if n.is_nan() {
        0
    } else {
        n.floor().clamp(0.0, 255.0) as u8
    }
}

/// Mutable frame exposed to user code as Lua userdata.
#[derive(Debug, Clone)]
pub struct FrameHandle {
    size: FrameSize,
    data: Vec<u8>,
}

impl FrameHandle {
    /// New zero-filled handle.
    #[must_use]
    pub fn new(size: FrameSize) -> Self {
        Self {
            size,
            data: vec![0; size.byte_len()],
        }
    }

    /// Byte offset of pixel `(x, y)`, or `None` when out of range.
    fn offset(&self, x: Option<f64>, y: Option<f64>) -> Option<usize> {
        let (x, y) = (x?.floor(), y?.floor());
        if !x.is_finite() || !y.is_finite() || x < 0.0 || y < 0.0 {
            return None;
        }
        let (x, y) = (x as usize, y as usize);
        if x >= self.size.width || y >= self.size.height {
            return None;
        }
        Some((y * self.size.width + x) * CHANNELS)
    }

    /// Set one pixel. Out-of-range coordinates are ignored.
    pub fn set_pixel(&mut self, x: Option<f64>, y: Option<f64>, color: Rgb) {
        if let Some(i) = self.offset(x, y) {
            self.data[i] = color.r;
            self.data[i + 1] = color.g;
            self.data[i + 2] = color.b;
        }
    }

    /// Read one pixel; black when out of range.
    #[must_use]
    pub fn get_pixel(&self, x: Option<f64>, y: Option<f64>) -> Rgb {
        self.offset(x, y)
            .map(|i| Rgb {
                r: self.data[i],
                g: self.data[i + 1],
                b: self.data[i + 2],
            })
            .unwrap_or_default()
    }

    /// Set every pixel.
    pub fn fill(&mut self, color: Rgb) {
        for px in self.data.chunks_exact_mut(CHANNELS) {
            px.copy_from_slice(&[color.r, color.g, color.b]);
        }
    }

    /// Zero the whole buffer.
    pub fn clear(&mut self) {
        self.data.fill(0);
    }

    /// Raw bytes in logical row-major order.
    #[must_use]
    pub fn raw(&self) -> &[u8] {
        &self.data
    }

    /// Hand the buffer over as a [`Frame`].
    #[must_use]
    pub fn into_frame(self) -> Frame {
        // Length is fixed at construction, so this cannot fail.
        Frame::from_bytes(self.size, self.data).unwrap_or_else(|_| Frame::black(self.size))
    }
}

impl UserData for FrameHandle {
    fn add_fields<F: UserDataFields<Self>>(fields: &mut F) {
        fields.add_field_method_get("width", |_, this| Ok(this.size.width));
        fields.add_field_method_get("height", |_, this| Ok(this.size.height));
    }

    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        for name in ["set_pixel", "setPixel"] {
            methods.add_method_mut(
                name,
                |_, this, (x, y, color): (Option<f64>, Option<f64>, Value)| {
                    if let Some(color) = Rgb::from_lua(&color) {
                        this.set_pixel(x, y, color);
                    }
                    Ok(())
                },
            );
        }

        for name in ["get_pixel", "getPixel"] {
            methods.add_method(name, |lua, this, (x, y): (Option<f64>, Option<f64>)| {
                let color = this.get_pixel(x, y);
                let table = lua.create_table()?;
                table.set("r", color.r)?;
                table.set("g", color.g)?;
                table.set("b", color.b)?;
                Ok(table)
            });
        }

        methods.add_method_mut("fill", |_, this, color: Value| {
            if let Some(color) = Rgb::from_lua(&color) {
                this.fill(color);
            }
            Ok(())
        });

        methods.add_method_mut("clear", |_, this, ()| {
            this.clear();
            Ok(())
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mlua::Lua;

    fn size() -> FrameSize {
        FrameSize::new(3, 2)
    }

    #[test]
    fn test_set_pixel_out_of_range_is_ignored() {
        let mut handle = FrameHandle::new(size());
        let red = Rgb { r: 255, g: 0, b: 0 };
        handle.set_pixel(Some(-1.0), Some(0.0), red);
        handle.set_pixel(Some(3.0), Some(0.0), red);
        handle.set_pixel(Some(0.0), Some(2.0), red);
        handle.set_pixel(None, Some(0.0), red);
        handle.set_pixel(Some(f64::NAN), Some(0.0), red);
        assert!(handle.raw().iter().all(|b| *b == 0));
    }

    #[test]
    fn test_coordinates_are_floored() {
        let mut handle = FrameHandle::new(size());
        handle.set_pixel(Some(1.9), Some(1.2), Rgb { r: 1, g: 2, b: 3 });
        assert_eq!(handle.get_pixel(Some(1.0), Some(1.0)), Rgb { r: 1, g: 2, b: 3 });
        // (1, 1) in a 3-wide frame is pixel 4
        assert_eq!(&handle.raw()[12..15], &[1, 2, 3]);
    }

    #[test]
    fn test_get_pixel_out_of_range_is_black() {
        let mut handle = FrameHandle::new(size());
        handle.fill(Rgb { r: 9, g: 9, b: 9 });
        assert_eq!(handle.get_pixel(Some(7.0), Some(7.0)), Rgb::default());
    }

    #[test]
    fn test_lua_color_is_clamped_and_defaulted() {
        let lua = Lua::new();
        let handle = lua.create_userdata(FrameHandle::new(size())).unwrap();
        lua.globals().set("frame", handle.clone()).unwrap();
        lua.load(r#"frame:set_pixel(0, 0, { r = 300.7, g = -5, b = 12.9 })"#)
            .exec()
            .unwrap();
        lua.load(r#"frame:setPixel(1, 0, { g = 7 })"#).exec().unwrap();
        lua.load(r#"frame:set_pixel(2, 0, "red")"#).exec().unwrap();

        let handle = handle.take::<FrameHandle>().unwrap();
        assert_eq!(&handle.raw()[..9], &[255, 0, 12, 0, 7, 0, 0, 0, 0]);
    }

    #[test]
    fn test_lua_fill_clear_and_dimensions() {
        let lua = Lua::new();
        let handle = lua.create_userdata(FrameHandle::new(size())).unwrap();
        lua.globals().set("frame", handle.clone()).unwrap();

        let (w, h): (usize, usize) = lua.load("return frame.width, frame.height").eval().unwrap();
        assert_eq!((w, h), (3, 2));

        let g: u8 = lua
            .load(
                r#"
                frame:fill({ r = 1, g = 2, b = 3 })
                return frame:get_pixel(2, 1).g
                "#,
            )
            .eval()
            .unwrap();
        assert_eq!(g, 2);

        lua.load("frame:clear()").exec().unwrap();
        let frame = handle.take::<FrameHandle>().unwrap().into_frame();
        assert!(frame.is_black());
    }
}
