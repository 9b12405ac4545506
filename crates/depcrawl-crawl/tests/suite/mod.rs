mod sdist_crawl;
mod support;
mod wheel_crawl;
