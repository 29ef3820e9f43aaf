//! MMD 模型运行时管理

mod loader;
mod material;
mod runtime;
mod submesh;

pub use loader::{load_model, IkDesc, ModelDesc, NodeDesc};
pub use material::{MmdMaterial, SphereMode};
pub use runtime::MmdModel;
pub use submesh::SubMesh;

/// 索引缓冲区，元素宽度随模型而定（1 / 2 / 4 字节）
#[derive(Clone, Debug, PartialEq)]
pub enum IndexBuffer {
    U8(Vec<u8>),
    U16(Vec<u16>),
    U32(Vec<u32>),
}

impl IndexBuffer {
    /// 单个索引的字节数
    pub fn element_size(&self) -> usize {
        match self {
            IndexBuffer::U8(_) => 1,
            IndexBuffer::U16(_) => 2,
            IndexBuffer::U32(_) => 4,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            IndexBuffer::U8(v) => v.len(),
            IndexBuffer::U16(v) => v.len(),
            IndexBuffer::U32(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, i: usize) -> Option<u32> {
        match self {
            IndexBuffer::U8(v) => v.get(i).map(|&x| u32::from(x)),
            IndexBuffer::U16(v) => v.get(i).map(|&x| u32::from(x)),
            IndexBuffer::U32(v) => v.get(i).copied(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        (0..self.len()).filter_map(move |i| self.get(i))
    }

    /// 按最小宽度打包
    pub fn from_u32(indices: Vec<u32>, vertex_count: usize) -> Self {
        if vertex_count <= usize::from(u8::MAX) + 1 {
            IndexBuffer::U8(indices.into_iter().map(|i| i as u8).collect())
        } else if vertex_count <= usize::from(u16::MAX) + 1 {
            IndexBuffer::U16(indices.into_iter().map(|i| i as u16).collect())
        } else {
            IndexBuffer::U32(indices)
        }
    }
}

impl Default for IndexBuffer {
    fn default() -> Self {
        IndexBuffer::U32(Vec::new())
    }
}
