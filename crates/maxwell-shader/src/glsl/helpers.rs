//! GLSL helper functions emitted ahead of `main` when the program needs them.

use bitflags::bitflags;

use crate::ir::{Function, Instruction};

use super::GlslWriter;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct HelperFunctionsMask: u32 {
        const MULTIPLY_HIGH_S32 = 1 << 0;
        const MULTIPLY_HIGH_U32 = 1 << 1;
        const SHUFFLE = 1 << 2;
        const SHUFFLE_DOWN = 1 << 3;
        const SHUFFLE_UP = 1 << 4;
        const SHUFFLE_XOR = 1 << 5;
        const SWIZZLE_ADD = 1 << 6;
    }
}

const SOURCES: [(HelperFunctionsMask, &str); 7] = [
    (
        HelperFunctionsMask::MULTIPLY_HIGH_S32,
        include_str!("helper_functions/multiply_high_s32.glsl"),
    ),
    (
        HelperFunctionsMask::MULTIPLY_HIGH_U32,
        include_str!("helper_functions/multiply_high_u32.glsl"),
    ),
    (
        HelperFunctionsMask::SHUFFLE,
        include_str!("helper_functions/shuffle.glsl"),
    ),
    (
        HelperFunctionsMask::SHUFFLE_DOWN,
        include_str!("helper_functions/shuffle_down.glsl"),
    ),
    (
        HelperFunctionsMask::SHUFFLE_UP,
        include_str!("helper_functions/shuffle_up.glsl"),
    ),
    (
        HelperFunctionsMask::SHUFFLE_XOR,
        include_str!("helper_functions/shuffle_xor.glsl"),
    ),
    (
        HelperFunctionsMask::SWIZZLE_ADD,
        include_str!("helper_functions/swizzle_add.glsl"),
    ),
];

impl HelperFunctionsMask {
    pub fn for_instruction(inst: Instruction) -> Self {
        match inst {
            Instruction::MultiplyHighS32 => Self::MULTIPLY_HIGH_S32,
            Instruction::MultiplyHighU32 => Self::MULTIPLY_HIGH_U32,
            Instruction::Shuffle => Self::SHUFFLE,
            Instruction::ShuffleDown => Self::SHUFFLE_DOWN,
            Instruction::ShuffleUp => Self::SHUFFLE_UP,
            Instruction::ShuffleXor => Self::SHUFFLE_XOR,
            Instruction::SwizzleAdd => Self::SWIZZLE_ADD,
            _ => Self::empty(),
        }
    }

    pub fn for_function(function: &Function) -> Self {
        function
            .all_ops()
            .map(|(_, id)| Self::for_instruction(function.op(id).inst))
            .fold(Self::empty(), |mask, flag| mask | flag)
    }
}

/// Helper source with the subgroup intrinsics of the host substituted in.
pub fn helper_source(helper: HelperFunctionsMask, shader_ballot: bool) -> Option<String> {
    let (_, source) = SOURCES.iter().find(|(flag, _)| *flag == helper)?;
    let (invocation, broadcast) = if shader_ballot {
        ("gl_SubGroupInvocationARB", "readInvocationARB")
    } else {
        ("gl_SubgroupInvocationID", "subgroupBroadcast")
    };
    Some(
        source
            .replace("$SUBGROUP_INVOCATION$", invocation)
            .replace("$SUBGROUP_BROADCAST$", broadcast),
    )
}

pub(super) fn write_helpers(w: &mut GlslWriter, mask: HelperFunctionsMask, shader_ballot: bool) {
    for (flag, _) in SOURCES {
        if !mask.contains(flag) {
            continue;
        }
        let Some(source) = helper_source(flag, shader_ballot) else {
            continue;
        };
        for line in source.lines() {
            w.line(line);
        }
        w.blank();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholders_follow_the_subgroup_extension() {
        let arb = helper_source(HelperFunctionsMask::SHUFFLE, true).unwrap();
        assert!(arb.contains("readInvocationARB(x, srcThreadId)"));
        assert!(arb.contains("gl_SubGroupInvocationARB & segMask"));

        let khr = helper_source(HelperFunctionsMask::SWIZZLE_ADD, false).unwrap();
        assert!(khr.contains("int(gl_SubgroupInvocationID & 3u) * 2"));
        assert!(!khr.contains('$'));
    }

    #[test]
    fn helpers_are_written_in_a_fixed_order() {
        let mut w = GlslWriter::new();
        write_helpers(
            &mut w,
            HelperFunctionsMask::SWIZZLE_ADD | HelperFunctionsMask::MULTIPLY_HIGH_U32,
            true,
        );
        let out = w.finish();
        let mul = out.find("uint Helper_MultiplyHighU32").unwrap();
        let swz = out.find("float Helper_SwizzleAdd").unwrap();
        assert!(mul < swz);
        assert!(!out.contains("Helper_Shuffle"));
    }

    #[test]
    fn only_helper_instructions_map_to_flags() {
        assert_eq!(
            HelperFunctionsMask::for_instruction(Instruction::ShuffleUp),
            HelperFunctionsMask::SHUFFLE_UP
        );
        assert!(HelperFunctionsMask::for_instruction(Instruction::Barrier).is_empty());
    }
}
