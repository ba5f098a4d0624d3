strong_type!(PluginId, u32);
strong_type!(Generation, u32);
strong_type!(LTime, u64);
