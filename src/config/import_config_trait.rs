// ==========================================
// 调度导出导入系统 - 导入配置读取 Trait
// ==========================================
// 职责: 定义解析器与创建器所需的配置读取接口（不包含实现）
// 红线: 不包含配置写入、不包含业务逻辑
// ==========================================

use crate::domain::types::OrderLifecycleState;
use crate::importer::error::ImportResult;
use crate::importer::material_blocks::MeasureAliases;
use crate::importer::metadata::MetadataLayout;
use crate::importer::raw_export_parser::ParserOptions;
use async_trait::async_trait;

// ==========================================
// ImportConfigReader Trait
// ==========================================
// 实现者: ConfigManager（从 config_kv 表读取）
#[async_trait]
pub trait ImportConfigReader: Send + Sync {
    // ===== 解析器配置 =====

    /// 表头最多扫描行数
    ///
    /// # 默认值
    /// - 10
    async fn get_header_scan_rows(&self) -> ImportResult<usize>;

    /// 材料度量别名
    ///
    /// # 默认值
    /// - 理论: teórica / teorica / teo
    /// - 实际: real
    /// - 返工: retrabajo / ret
    /// - 人工: manual / man
    async fn get_measure_aliases(&self) -> ImportResult<MeasureAliases>;

    /// 元信息坐标布局
    ///
    /// # 默认值
    /// - v1（第 3 行: 列 6 / 9 / 37 / 43）
    async fn get_metadata_layout(&self) -> ImportResult<MetadataLayout>;

    /// 组合出完整解析参数
    async fn get_parser_options(&self) -> ImportResult<ParserOptions> {
        Ok(ParserOptions {
            header_scan_rows: self.get_header_scan_rows().await?,
            measure_aliases: self.get_measure_aliases().await?,
            metadata_layout: self.get_metadata_layout().await?,
        })
    }

    // ===== 创建器配置 =====

    /// 可接收送货单的订单状态
    ///
    /// # 默认值
    /// - created, validated, scheduled
    async fn get_open_order_states(&self) -> ImportResult<Vec<OrderLifecycleState>>;

    /// 送货日期与订单交付日期的容差（天）
    ///
    /// # 默认值
    /// - 1
    async fn get_date_tolerance_days(&self) -> ImportResult<i64>;
}
