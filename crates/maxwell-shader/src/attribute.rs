//! Maxwell attribute address space.
//!
//! `ALD`/`AST`/`IPA` address attributes by byte offset. Built-ins occupy fixed slots; generic
//! attributes start at [`USER_ATTRIBUTE_BASE`] with 16 bytes (four 32-bit components) per
//! location. Per-patch accesses reuse the same offsets with a separate storage kind.

use crate::ir::IoVariable;
use crate::types::ShaderStage;

/// Outer tessellation levels (4 floats, per patch).
pub const TESS_LEVEL_OUTER: u32 = 0x000;
/// Inner tessellation levels (2 floats, per patch).
pub const TESS_LEVEL_INNER: u32 = 0x010;
pub const PRIMITIVE_ID: u32 = 0x060;
pub const LAYER: u32 = 0x064;
pub const VIEWPORT_INDEX: u32 = 0x068;
pub const POINT_SIZE: u32 = 0x06c;
/// `x`, `y`, `z`, `w` of the clip-space position (fragment coordinate in fragment shaders).
pub const POSITION_X: u32 = 0x070;
/// First generic attribute component.
pub const USER_ATTRIBUTE_BASE: u32 = 0x080;
/// One past the last generic attribute component the hardware can address (32 locations).
pub const USER_ATTRIBUTE_END: u32 = 0x280;
/// Eight clip distances.
pub const CLIP_DISTANCE_0: u32 = 0x2c0;
pub const POINT_COORD_X: u32 = 0x2e0;
pub const TESS_COORD_X: u32 = 0x2f0;
pub const INSTANCE_ID: u32 = 0x2f8;
pub const VERTEX_ID: u32 = 0x2fc;
pub const FRONT_FACING: u32 = 0x3fc;

/// Generic attribute locations the translator declares (`in_attr0..in_attr15`).
pub const USER_ATTRIBUTES_COUNT: u32 = 16;
pub const CLIP_DISTANCES_COUNT: u32 = 8;

/// What an attribute byte offset refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeTarget {
    /// A built-in variable; `component` is present for vector/array built-ins.
    Builtin {
        variable: IoVariable,
        component: Option<u32>,
    },
    /// A generic attribute.
    User { location: u32, component: u32 },
}

/// Whether `address` falls inside the generic attribute window.
pub fn is_user_attribute(address: u32) -> bool {
    (USER_ATTRIBUTE_BASE..USER_ATTRIBUTE_END).contains(&address)
}

/// Resolves a byte offset to its IO variable.
///
/// Returns `None` for offsets the translator does not model, including generic locations past
/// [`USER_ATTRIBUTES_COUNT`].
pub fn resolve(
    address: u32,
    stage: ShaderStage,
    is_output: bool,
    per_patch: bool,
) -> Option<AttributeTarget> {
    if address % 4 != 0 {
        return None;
    }

    let component = (address >> 2) & 3;

    if is_user_attribute(address) {
        let location = (address - USER_ATTRIBUTE_BASE) >> 4;
        if location >= USER_ATTRIBUTES_COUNT {
            return None;
        }
        return Some(AttributeTarget::User {
            location,
            component,
        });
    }

    let builtin = |variable: IoVariable, component: Option<u32>| {
        Some(AttributeTarget::Builtin {
            variable,
            component,
        })
    };

    if per_patch {
        return match address {
            TESS_LEVEL_OUTER..=0x00c => builtin(IoVariable::TessellationLevelOuter, Some(component)),
            TESS_LEVEL_INNER..=0x014 => builtin(
                IoVariable::TessellationLevelInner,
                Some(component & 1),
            ),
            _ => None,
        };
    }

    match address {
        PRIMITIVE_ID => builtin(IoVariable::PrimitiveId, None),
        LAYER => builtin(IoVariable::Layer, None),
        VIEWPORT_INDEX => builtin(IoVariable::ViewportIndex, None),
        POINT_SIZE => builtin(IoVariable::PointSize, None),
        POSITION_X..=0x07c => {
            if stage == ShaderStage::Fragment && !is_output {
                builtin(IoVariable::FragmentCoord, Some(component))
            } else {
                builtin(IoVariable::Position, Some(component))
            }
        }
        CLIP_DISTANCE_0..=0x2dc => builtin(
            IoVariable::ClipDistance,
            Some((address - CLIP_DISTANCE_0) >> 2),
        ),
        POINT_COORD_X | 0x2e4 => builtin(IoVariable::PointCoord, Some(component & 1)),
        TESS_COORD_X | 0x2f4 => builtin(IoVariable::TessellationCoord, Some(component & 1)),
        INSTANCE_ID => builtin(IoVariable::InstanceId, None),
        VERTEX_ID => builtin(IoVariable::VertexId, None),
        FRONT_FACING => builtin(IoVariable::FrontFacing, None),
        _ => None,
    }
}
