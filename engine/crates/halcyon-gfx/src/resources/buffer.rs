use std::ptr;

use ash::vk;
use vk_mem::Alloc;

use crate::{error::GfxResult, foundation::debug_messenger::DebugType, gfx::Gfx};

/// buffer 的用途，决定 usage flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferRole {
    Vertex,
    Index,
    /// compute shader 通过 device address 或 descriptor 读写
    Storage,
    /// 同时作为 indirect 参数和 storage buffer（compaction 写入）
    Indirect,
    Uniform,
    /// CPU → GPU 的中转
    Staging,
    /// GPU → CPU 的回读
    Readback,
}

impl BufferRole {
    pub fn usage_flags(self) -> vk::BufferUsageFlags {
        let transfer = vk::BufferUsageFlags::TRANSFER_SRC | vk::BufferUsageFlags::TRANSFER_DST;
        match self {
            BufferRole::Vertex => {
                vk::BufferUsageFlags::VERTEX_BUFFER
                    | vk::BufferUsageFlags::STORAGE_BUFFER
                    | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS
                    | transfer
            }
            BufferRole::Index => {
                vk::BufferUsageFlags::INDEX_BUFFER
                    | vk::BufferUsageFlags::STORAGE_BUFFER
                    | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS
                    | transfer
            }
            BufferRole::Storage => {
                vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS | transfer
            }
            BufferRole::Indirect => {
                vk::BufferUsageFlags::INDIRECT_BUFFER
                    | vk::BufferUsageFlags::STORAGE_BUFFER
                    | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS
                    | transfer
            }
            // 不允许 UNIFORM + DBA 的组合
            BufferRole::Uniform => vk::BufferUsageFlags::UNIFORM_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
            BufferRole::Staging => vk::BufferUsageFlags::TRANSFER_SRC,
            BufferRole::Readback => vk::BufferUsageFlags::TRANSFER_DST,
        }
    }
}

/// buffer 所在的内存
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryDomain {
    /// 优先使用 device local，不映射
    Device,
    /// host 可见并持久映射，顺序写入
    Upload,
    /// host 可见并持久映射，随机读取
    Readback,
}

/// 创建 [`GfxBuffer`] 的参数
#[derive(Debug, Clone)]
pub struct GfxBufferDesc {
    pub size: vk::DeviceSize,
    pub role: BufferRole,
    pub memory: MemoryDomain,
    /// 在大块 memory 中的起始对齐，默认 8 字节
    pub align: Option<vk::DeviceSize>,
}

impl GfxBufferDesc {
    #[inline]
    pub fn new(size: vk::DeviceSize, role: BufferRole, memory: MemoryDomain) -> Self {
        Self {
            size,
            role,
            memory,
            align: None,
        }
    }

    #[inline]
    pub fn with_align(mut self, align: vk::DeviceSize) -> Self {
        self.align = Some(align);
        self
    }

    #[inline]
    pub fn stage(size: vk::DeviceSize) -> Self {
        Self::new(size, BufferRole::Staging, MemoryDomain::Upload)
    }
}

/// 唯一的 buffer 类型，用途和内存位置由 [`GfxBufferDesc`] 决定
pub struct GfxBuffer {
    handle: vk::Buffer,
    allocation: vk_mem::Allocation,

    desc: GfxBufferDesc,

    /// 在初始化阶段写死
    map_ptr: Option<*mut u8>,
    /// 只有在 buffer usage 包含 SHADER_DEVICE_ADDRESS 时才有值
    device_addr: Option<vk::DeviceAddress>,

    debug_name: String,
}
impl DebugType for GfxBuffer {
    fn debug_type_name() -> &'static str {
        "GfxBuffer"
    }

    fn vk_handle(&self) -> impl vk::Handle {
        self.handle
    }
}
impl Drop for GfxBuffer {
    fn drop(&mut self) {
        let allocator = Gfx::get().allocator();
        unsafe {
            if self.map_ptr.is_some() {
                allocator.unmap_memory(&mut self.allocation);
            }

            allocator.destroy_buffer(self.handle, &mut self.allocation);
        }
    }
}
// new & init
impl GfxBuffer {
    pub fn new(desc: GfxBufferDesc, name: impl AsRef<str>) -> GfxResult<Self> {
        let _span = tracy_client::span!("GfxBuffer::new");
        let buffer_usage = desc.role.usage_flags();
        let buffer_ci = vk::BufferCreateInfo::default().size(desc.size).usage(buffer_usage);
        let alloc_ci = vk_mem::AllocationCreateInfo {
            usage: match desc.memory {
                MemoryDomain::Device => vk_mem::MemoryUsage::AutoPreferDevice,
                MemoryDomain::Upload | MemoryDomain::Readback => vk_mem::MemoryUsage::AutoPreferHost,
            },
            flags: match desc.memory {
                MemoryDomain::Device => vk_mem::AllocationCreateFlags::empty(),
                MemoryDomain::Upload => vk_mem::AllocationCreateFlags::HOST_ACCESS_SEQUENTIAL_WRITE,
                MemoryDomain::Readback => vk_mem::AllocationCreateFlags::HOST_ACCESS_RANDOM,
            },
            ..Default::default()
        };

        let allocator = Gfx::get().allocator();
        let (buffer, mut alloc) =
            unsafe { allocator.create_buffer_with_alignment(&buffer_ci, &alloc_ci, desc.align.unwrap_or(8))? };

        let map_ptr = match desc.memory {
            MemoryDomain::Device => None,
            MemoryDomain::Upload | MemoryDomain::Readback => Some(unsafe { allocator.map_memory(&mut alloc)? }),
        };

        let device_addr = buffer_usage.contains(vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS).then(|| unsafe {
            Gfx::get().gfx_device().get_buffer_device_address(&vk::BufferDeviceAddressInfo::default().buffer(buffer))
        });

        Gfx::get().gfx_device().set_object_debug_name(buffer, format!("GfxBuffer::{}", name.as_ref()));
        Ok(Self {
            handle: buffer,
            allocation: alloc,
            desc,
            map_ptr,
            device_addr,
            debug_name: name.as_ref().to_string(),
        })
    }

    #[inline]
    pub fn new_stage_buffer(size: vk::DeviceSize, debug_name: impl AsRef<str>) -> GfxResult<Self> {
        Self::new(GfxBufferDesc::stage(size), debug_name)
    }

    #[inline]
    pub fn destroy(self) {
        drop(self)
    }
}
// getters
impl GfxBuffer {
    #[inline]
    pub fn vk_buffer(&self) -> vk::Buffer {
        self.handle
    }

    /// 没有 SHADER_DEVICE_ADDRESS 的 buffer（Uniform/Staging/Readback）返回 None
    #[inline]
    pub fn device_address(&self) -> Option<vk::DeviceAddress> {
        self.device_addr
    }

    #[inline]
    pub fn size(&self) -> vk::DeviceSize {
        self.desc.size
    }

    #[inline]
    pub fn desc(&self) -> &GfxBufferDesc {
        &self.desc
    }

    #[inline]
    pub fn debug_name(&self) -> &str {
        &self.debug_name
    }
}
// tools
impl GfxBuffer {
    /// 非映射 buffer 返回 None
    #[inline]
    pub fn mapped_ptr(&self) -> Option<*mut u8> {
        self.map_ptr
    }

    #[inline]
    pub fn flush(&self, offset: vk::DeviceSize, size: vk::DeviceSize) -> GfxResult<()> {
        Gfx::get().allocator().flush_allocation(&self.allocation, offset, size)?;
        Ok(())
    }

    #[inline]
    pub fn invalidate(&self, offset: vk::DeviceSize, size: vk::DeviceSize) -> GfxResult<()> {
        Gfx::get().allocator().invalidate_allocation(&self.allocation, offset, size)?;
        Ok(())
    }

    /// 通过 mem map 的方式将 data 写入到 buffer 的 offset 处
    ///
    /// # Panics
    /// buffer 没有映射，或者写入越界
    pub fn write_by_mmap<T: bytemuck::Pod>(&self, data: &[T], offset: vk::DeviceSize) -> GfxResult<()> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        assert!(offset + bytes.len() as vk::DeviceSize <= self.desc.size, "write out of range: {}", self.debug_name);
        let dst = self.map_ptr.unwrap_or_else(|| panic!("buffer {} is not host visible", self.debug_name));
        unsafe {
            ptr::copy_nonoverlapping(bytes.as_ptr(), dst.add(offset as usize), bytes.len());
        }
        self.flush(offset, bytes.len() as vk::DeviceSize)
    }

    /// 从映射内存读回 data
    ///
    /// # Panics
    /// buffer 没有映射，或者读取越界
    pub fn read_by_mmap<T: bytemuck::Pod>(&self, offset: vk::DeviceSize, count: usize) -> GfxResult<Vec<T>> {
        let byte_len = (count * size_of::<T>()) as vk::DeviceSize;
        assert!(offset + byte_len <= self.desc.size, "read out of range: {}", self.debug_name);
        let src = self.map_ptr.unwrap_or_else(|| panic!("buffer {} is not host visible", self.debug_name));
        self.invalidate(offset, byte_len)?;

        let mut out = vec![T::zeroed(); count];
        unsafe {
            ptr::copy_nonoverlapping(src.add(offset as usize), out.as_mut_ptr() as *mut u8, byte_len as usize);
        }
        Ok(out)
    }

    /// 创建一个临时的 stage buffer，先将数据放入 stage buffer，再 transfer 到 self 的 offset 处
    ///
    /// 同步等待，会阻塞运行。避免用来传输小块数据
    pub fn transfer_data_sync<T: bytemuck::Pod>(&self, data: &[T], offset: vk::DeviceSize) -> GfxResult<()> {
        let size = size_of_val(data) as vk::DeviceSize;
        if size == 0 {
            return Ok(());
        }
        let stage_buffer = Self::new_stage_buffer(size, format!("{}-stage-buffer", self.debug_name))?;
        stage_buffer.write_by_mmap(data, 0)?;

        Gfx::get().one_time_exec(
            |cmd| {
                cmd.cmd_copy_buffer(
                    &stage_buffer,
                    self,
                    &[vk::BufferCopy {
                        src_offset: 0,
                        dst_offset: offset,
                        size,
                    }],
                );
            },
            &format!("{}-transfer-data", &self.debug_name),
        )
    }
}
